//! MVSNet-style camera text files.
//!
//! ```text
//! extrinsic
//! r11 r12 r13 t1
//! r21 r22 r23 t2
//! r31 r32 r33 t3
//! 0 0 0 1
//!
//! intrinsic
//! fx 0 cx
//! 0 fy cy
//! 0 0 1
//!
//! depth_min depth_max
//! ```
//!
//! The depth line may also read `min interval num` (max is
//! `min + interval * (num - 1)`) or `min interval num max`.

use crate::camera::Camera;
use crate::util::{ApdError, ApdResult};
use nalgebra::{Matrix3, Vector3};
use std::path::Path;

struct Lines<'a> {
    origin: &'a str,
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    fn error(&self, line: usize, reason: impl Into<String>) -> ApdError {
        ApdError::Parse {
            path: self.origin.to_string(),
            line,
            reason: reason.into(),
        }
    }

    /// Next non-empty line with its 1-based number.
    fn next_content(&mut self) -> Option<(usize, &'a str)> {
        self.inner
            .by_ref()
            .map(|(i, l)| (i + 1, l.trim()))
            .find(|(_, l)| !l.is_empty())
    }

    fn expect_keyword(&mut self, keyword: &str) -> ApdResult<()> {
        match self.next_content() {
            Some((_, l)) if l.eq_ignore_ascii_case(keyword) => Ok(()),
            Some((n, l)) => Err(self.error(n, format!("expected '{keyword}', found '{l}'"))),
            None => Err(self.error(0, format!("missing '{keyword}' section"))),
        }
    }

    fn numbers(&mut self, min: usize, max: usize) -> ApdResult<(usize, Vec<f32>)> {
        let (n, line) = self
            .next_content()
            .ok_or_else(|| self.error(0, "unexpected end of file"))?;
        let values = line
            .split_whitespace()
            .map(|t| t.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| self.error(n, err.to_string()))?;
        if values.len() < min || values.len() > max {
            return Err(self.error(
                n,
                format!("expected {min}..={max} numbers, found {}", values.len()),
            ));
        }
        Ok((n, values))
    }
}

/// Parses camera text for an image of `width x height`.
pub fn parse_camera(text: &str, origin: &str, width: usize, height: usize) -> ApdResult<Camera> {
    let mut lines = Lines {
        origin,
        inner: text.lines().enumerate(),
    };

    lines.expect_keyword("extrinsic")?;
    let mut r = Matrix3::zeros();
    let mut t = Vector3::zeros();
    for row in 0..3 {
        let (_, v) = lines.numbers(4, 4)?;
        for col in 0..3 {
            r[(row, col)] = v[col];
        }
        t[row] = v[3];
    }
    lines.numbers(4, 4)?;

    lines.expect_keyword("intrinsic")?;
    let mut k = Matrix3::zeros();
    for row in 0..3 {
        let (_, v) = lines.numbers(3, 3)?;
        for col in 0..3 {
            k[(row, col)] = v[col];
        }
    }

    let (n, depth) = lines.numbers(2, 4)?;
    let (depth_min, depth_max) = match depth.as_slice() {
        [min, max] => (*min, *max),
        [min, interval, num] => (*min, *min + *interval * (*num - 1.0)),
        [min, _, _, max] => (*min, *max),
        _ => return Err(lines.error(n, "invalid depth line")),
    };

    Camera::new(k, r, t, width, height, depth_min, depth_max).map_err(|err| match err {
        ApdError::Configuration { reason } | ApdError::Parse { reason, .. } => lines.error(n, reason),
        other => other,
    })
}

/// Reads and parses a camera file.
pub fn read_camera<P: AsRef<Path>>(path: P, width: usize, height: usize) -> ApdResult<Camera> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|err| ApdError::io(path, err))?;
    parse_camera(&text, &path.display().to_string(), width, height)
}

/// Formats a camera in the same layout [`parse_camera`] reads.
pub fn format_camera(camera: &Camera) -> String {
    let r = camera.rotation();
    let t = camera.translation();
    let k = camera.k();
    let mut out = String::from("extrinsic\n");
    for row in 0..3 {
        out.push_str(&format!(
            "{} {} {} {}\n",
            r[(row, 0)],
            r[(row, 1)],
            r[(row, 2)],
            t[row]
        ));
    }
    out.push_str("0 0 0 1\n\nintrinsic\n");
    for row in 0..3 {
        out.push_str(&format!("{} {} {}\n", k[(row, 0)], k[(row, 1)], k[(row, 2)]));
    }
    out.push_str(&format!("\n{} {}\n", camera.depth_min(), camera.depth_max()));
    out
}

#[cfg(test)]
mod tests {
    use super::{format_camera, parse_camera};

    const TEXT: &str = "extrinsic
1 0 0 0.5
0 1 0 0
0 0 1 0
0 0 0 1

intrinsic
100 0 32
0 100 24
0 0 1

2.0 0.1 11
";

    #[test]
    fn parses_interval_depth_line() {
        let cam = parse_camera(TEXT, "00000000_cam.txt", 64, 48).unwrap();
        assert_eq!(cam.k()[(0, 2)], 32.0);
        assert_eq!(cam.translation().x, 0.5);
        assert!((cam.depth_max() - 3.0).abs() < 1e-5);
    }

    #[test]
    fn formatted_camera_parses_back() {
        let cam = parse_camera(TEXT, "a", 64, 48).unwrap();
        let again = parse_camera(&format_camera(&cam), "b", 64, 48).unwrap();
        assert_eq!(cam, again);
    }

    #[test]
    fn missing_intrinsic_reports_line() {
        let text = TEXT.replace("intrinsic", "intrinsics");
        let err = parse_camera(&text, "cam.txt", 64, 48).unwrap_err();
        assert!(matches!(err, crate::util::ApdError::Parse { line: 7, .. }));
    }
}
