//! Binary matrix files.
//!
//! Layout: four little-endian `i32` (type code, height, width, channels)
//! followed by the row-major, channel-interleaved elements in little endian.

use crate::util::{ApdError, ApdResult};
use std::fs;
use std::path::Path;

const HEADER_LEN: usize = 16;

/// Element types that can be stored in a binary matrix.
pub trait BinElement: Copy {
    const TYPE_CODE: i32;
    const SIZE: usize;

    fn put(self, out: &mut Vec<u8>);
    fn take(bytes: &[u8]) -> Self;
}

impl BinElement for f32 {
    const TYPE_CODE: i32 = 1;
    const SIZE: usize = 4;

    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn take(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl BinElement for u8 {
    const TYPE_CODE: i32 = 2;
    const SIZE: usize = 1;

    fn put(self, out: &mut Vec<u8>) {
        out.push(self);
    }

    fn take(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl BinElement for u32 {
    const TYPE_CODE: i32 = 3;
    const SIZE: usize = 4;

    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn take(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Decoded matrix with its shape.
#[derive(Clone, Debug, PartialEq)]
pub struct BinMat<T> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<T>,
}

fn parse_error(origin: &str, reason: impl Into<String>) -> ApdError {
    ApdError::Parse {
        path: origin.to_string(),
        line: 0,
        reason: reason.into(),
    }
}

/// Serializes a matrix into bytes.
pub fn encode<T: BinElement>(
    width: usize,
    height: usize,
    channels: usize,
    data: &[T],
) -> ApdResult<Vec<u8>> {
    let needed = width * height * channels;
    if data.len() != needed {
        return Err(ApdError::BufferTooSmall {
            needed,
            got: data.len(),
        });
    }
    let dim =
        |v: usize| i32::try_from(v).map_err(|_| ApdError::InvalidDimensions { width, height });
    let mut out = Vec::with_capacity(HEADER_LEN + needed * T::SIZE);
    for field in [T::TYPE_CODE, dim(height)?, dim(width)?, dim(channels)?] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    for &value in data {
        value.put(&mut out);
    }
    Ok(out)
}

/// Parses bytes produced by [`encode`]; `origin` names the source in errors.
pub fn decode<T: BinElement>(bytes: &[u8], origin: &str) -> ApdResult<BinMat<T>> {
    if bytes.len() < HEADER_LEN {
        return Err(parse_error(origin, "truncated header"));
    }
    let field = |i: usize| {
        let b = &bytes[i * 4..i * 4 + 4];
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    };
    let (code, height, width, channels) = (field(0), field(1), field(2), field(3));
    if code != T::TYPE_CODE {
        return Err(parse_error(
            origin,
            format!("type code {code}, expected {}", T::TYPE_CODE),
        ));
    }
    if height < 0 || width < 0 || channels <= 0 {
        return Err(parse_error(
            origin,
            format!("invalid shape {height}x{width}x{channels}"),
        ));
    }
    let (height, width, channels) = (height as usize, width as usize, channels as usize);
    let expected = height
        .checked_mul(width)
        .and_then(|n| n.checked_mul(channels))
        .and_then(|n| n.checked_mul(T::SIZE))
        .ok_or_else(|| {
            parse_error(
                origin,
                format!("shape {height}x{width}x{channels} overflows"),
            )
        })?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != expected {
        return Err(parse_error(
            origin,
            format!("payload has {} bytes, expected {expected}", payload.len()),
        ));
    }
    let data = payload.chunks_exact(T::SIZE).map(T::take).collect();
    Ok(BinMat {
        width,
        height,
        channels,
        data,
    })
}

/// Writes a matrix file.
pub fn write_binmat<T: BinElement, P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    channels: usize,
    data: &[T],
) -> ApdResult<()> {
    let path = path.as_ref();
    let bytes = encode(width, height, channels, data)?;
    fs::write(path, bytes).map_err(|err| ApdError::io(path, err))
}

/// Reads a matrix file.
pub fn read_binmat<T: BinElement, P: AsRef<Path>>(path: P) -> ApdResult<BinMat<T>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|err| ApdError::io(path, err))?;
    decode(&bytes, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::{decode, encode};
    use crate::util::ApdError;

    #[test]
    fn header_is_little_endian() {
        let bytes = encode(2, 1, 1, &[1.5f32, -2.0]).unwrap();
        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_le_bytes());
        assert_eq!(bytes.len(), 16 + 8);
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let bytes = encode(1, 1, 1, &[7u8]).unwrap();
        let err = decode::<f32>(&bytes, "weak.bin").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = encode(2, 2, 1, &[1u32, 2, 3, 4]).unwrap();
        bytes.pop();
        assert!(decode::<u32>(&bytes, "selected_views.bin").is_err());
    }

    #[test]
    fn oversized_shape_is_a_parse_error() {
        let mut bytes = Vec::new();
        for field in [1i32, i32::MAX, i32::MAX, i32::MAX] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        let err = decode::<f32>(&bytes, "depths.dmb").unwrap_err();
        assert!(matches!(err, ApdError::Parse { line: 0, .. }));
    }
}
