//! Binary little-endian PLY export of fused points.

use crate::fusion::PointRecord;
use crate::util::{ApdError, ApdResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes `points` to any sink as a binary PLY with float xyz and uchar rgb.
pub fn write_ply_to<W: Write>(mut out: W, points: &[PointRecord]) -> std::io::Result<()> {
    write!(
        out,
        "ply\nformat binary_little_endian 1.0\nelement vertex {}\n\
         property float x\nproperty float y\nproperty float z\n\
         property uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n",
        points.len()
    )?;
    for point in points {
        for v in point.position {
            out.write_all(&v.to_le_bytes())?;
        }
        out.write_all(&point.color)?;
    }
    out.flush()
}

/// Writes a PLY file.
pub fn write_ply<P: AsRef<Path>>(path: P, points: &[PointRecord]) -> ApdResult<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|err| ApdError::io(path, err))?;
    write_ply_to(BufWriter::new(file), points).map_err(|err| ApdError::io(path, err))
}

/// Reads back a file written by [`write_ply`].
pub fn read_ply<P: AsRef<Path>>(path: P) -> ApdResult<Vec<PointRecord>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|err| ApdError::io(path, err))?;
    parse_ply(&bytes, &path.display().to_string())
}

/// Parses the binary layout produced by [`write_ply_to`].
pub fn parse_ply(bytes: &[u8], origin: &str) -> ApdResult<Vec<PointRecord>> {
    let error = |reason: &str| ApdError::Parse {
        path: origin.to_string(),
        line: 0,
        reason: reason.to_string(),
    };
    const END: &[u8] = b"end_header\n";
    let header_end = bytes
        .windows(END.len())
        .position(|w| w == END)
        .ok_or_else(|| error("missing end_header"))?
        + END.len();
    let header =
        std::str::from_utf8(&bytes[..header_end]).map_err(|_| error("header is not utf-8"))?;
    if !header.contains("format binary_little_endian 1.0") {
        return Err(error("unsupported ply format"));
    }
    let count: usize = header
        .lines()
        .find_map(|l| l.strip_prefix("element vertex "))
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| error("missing vertex count"))?;

    const RECORD: usize = 15;
    let body = &bytes[header_end..];
    let expected = count
        .checked_mul(RECORD)
        .ok_or_else(|| error("vertex count overflows"))?;
    if body.len() != expected {
        return Err(error("vertex data length does not match header"));
    }
    Ok(body
        .chunks_exact(RECORD)
        .map(|r| {
            let f = |i: usize| f32::from_le_bytes([r[i], r[i + 1], r[i + 2], r[i + 3]]);
            PointRecord {
                position: [f(0), f(4), f(8)],
                color: [r[12], r[13], r[14]],
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{parse_ply, write_ply_to};
    use crate::fusion::PointRecord;
    use crate::util::ApdError;

    #[test]
    fn header_and_records_parse_back() {
        let points = vec![
            PointRecord {
                position: [1.0, -2.0, 3.5],
                color: [10, 20, 30],
            },
            PointRecord {
                position: [0.0, 0.25, 7.0],
                color: [255, 0, 1],
            },
        ];
        let mut bytes = Vec::new();
        write_ply_to(&mut bytes, &points).unwrap();
        let text = String::from_utf8_lossy(&bytes[..64]);
        assert!(text.starts_with("ply\nformat binary_little_endian 1.0\nelement vertex 2\n"));
        assert_eq!(parse_ply(&bytes, "mem").unwrap(), points);
    }

    #[test]
    fn huge_vertex_count_is_a_parse_error() {
        let header = format!(
            "ply\nformat binary_little_endian 1.0\nelement vertex {}\nend_header\n",
            usize::MAX
        );
        let err = parse_ply(header.as_bytes(), "cloud.ply").unwrap_err();
        assert!(matches!(err, ApdError::Parse { .. }));
    }
}
