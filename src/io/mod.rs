//! On-disk formats of a dense reconstruction folder.
//!
//! Layout read and written by the pipeline:
//!
//! ```text
//! <dense>/pair.txt
//! <dense>/images/<id:08>.jpg
//! <dense>/cams/<id:08>_cam.txt
//! <dense>/APD/<id:08>/{depths.dmb, normals.dmb, weak.bin, selected_views.bin}
//! <dense>/APD/APD.ply
//! ```

pub mod binmat;
pub mod camera;
pub mod output;
pub mod pair;
pub mod ply;
#[cfg(feature = "image-io")]
pub mod preview;

pub use binmat::{read_binmat, write_binmat, BinElement, BinMat};
pub use camera::{format_camera, parse_camera, read_camera};
pub use output::{load_depth, load_output, remove_output, save_output};
pub use pair::{parse_pairing_list, problems_from_entries, read_pairing_list, PairEntry};
pub use ply::{read_ply, write_ply, write_ply_to};
