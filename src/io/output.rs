//! Persisted per-problem outputs.

use super::binmat::{read_binmat, write_binmat, BinMat};
use crate::classify::PixelState;
use crate::engine::ProblemOutput;
use crate::image::OwnedImage;
use crate::util::{ApdError, ApdResult};
use std::path::Path;

pub const DEPTH_FILE: &str = "depths.dmb";
pub const NORMAL_FILE: &str = "normals.dmb";
pub const STATE_FILE: &str = "weak.bin";
pub const SELECTED_VIEWS_FILE: &str = "selected_views.bin";

/// Writes the four maps into `folder`, creating it if needed.
pub fn save_output<P: AsRef<Path>>(folder: P, output: &ProblemOutput) -> ApdResult<()> {
    let folder = folder.as_ref();
    std::fs::create_dir_all(folder).map_err(|err| ApdError::io(folder, err))?;
    let (w, h) = output.depth.dims();

    write_binmat(folder.join(DEPTH_FILE), w, h, 1, output.depth.data())?;
    let normals: Vec<f32> = output.normals.data().iter().flatten().copied().collect();
    write_binmat(folder.join(NORMAL_FILE), w, h, 3, &normals)?;
    let states: Vec<u8> = output.states.data().iter().map(|s| s.as_u8()).collect();
    write_binmat(folder.join(STATE_FILE), w, h, 1, &states)?;
    write_binmat(
        folder.join(SELECTED_VIEWS_FILE),
        w,
        h,
        1,
        output.selected_views.data(),
    )
}

fn expect_shape<T>(
    mat: &BinMat<T>,
    path: &Path,
    width: usize,
    height: usize,
    channels: usize,
) -> ApdResult<()> {
    if (mat.width, mat.height, mat.channels) != (width, height, channels) {
        return Err(ApdError::Parse {
            path: path.display().to_string(),
            line: 0,
            reason: format!(
                "shape {}x{}x{} does not match {width}x{height}x{channels}",
                mat.height, mat.width, mat.channels
            ),
        });
    }
    Ok(())
}

/// Reads only the depth map of a problem folder.
pub fn load_depth<P: AsRef<Path>>(folder: P) -> ApdResult<OwnedImage<f32>> {
    let path = folder.as_ref().join(DEPTH_FILE);
    let mat = read_binmat::<f32, _>(&path)?;
    expect_shape(&mat, &path, mat.width, mat.height, 1)?;
    OwnedImage::new(mat.data, mat.width, mat.height)
}

/// Reads the four maps written by [`save_output`].
pub fn load_output<P: AsRef<Path>>(folder: P) -> ApdResult<ProblemOutput> {
    let folder = folder.as_ref();
    let depth = load_depth(folder)?;
    let (w, h) = depth.dims();

    let path = folder.join(NORMAL_FILE);
    let mat = read_binmat::<f32, _>(&path)?;
    expect_shape(&mat, &path, w, h, 3)?;
    let normals = mat
        .data
        .chunks_exact(3)
        .map(|n| [n[0], n[1], n[2]])
        .collect();

    let path = folder.join(STATE_FILE);
    let mat = read_binmat::<u8, _>(&path)?;
    expect_shape(&mat, &path, w, h, 1)?;
    let states = mat
        .data
        .iter()
        .map(|&code| {
            PixelState::from_u8(code).ok_or_else(|| ApdError::Parse {
                path: path.display().to_string(),
                line: 0,
                reason: format!("unknown pixel state {code}"),
            })
        })
        .collect::<ApdResult<Vec<_>>>()?;

    let path = folder.join(SELECTED_VIEWS_FILE);
    let mat = read_binmat::<u32, _>(&path)?;
    expect_shape(&mat, &path, w, h, 1)?;

    Ok(ProblemOutput {
        depth,
        normals: OwnedImage::new(normals, w, h)?,
        states: OwnedImage::new(states, w, h)?,
        selected_views: OwnedImage::new(mat.data, w, h)?,
    })
}

/// Removes the persisted maps of a problem folder; missing files are ignored.
pub fn remove_output<P: AsRef<Path>>(folder: P) -> ApdResult<()> {
    let folder = folder.as_ref();
    for name in [DEPTH_FILE, NORMAL_FILE, STATE_FILE, SELECTED_VIEWS_FILE] {
        let path = folder.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(ApdError::io(&path, err)),
        }
    }
    Ok(())
}
