//! Nearest STRONG pixel index for WEAK pixels.

use super::PixelState;
use crate::device::Device;

/// Search radius at which the nearest-strong scan gives up.
pub const MAX_SEARCH_RADIUS: usize = 4096;

/// Maps each WEAK pixel to its nearest STRONG pixel (Euclidean distance).
///
/// Rebuilt as a whole after every classification; never patched in place.
#[derive(Clone, Debug, PartialEq)]
pub struct NearestStrongMap {
    width: usize,
    height: usize,
    entries: Vec<Option<(usize, usize)>>,
}

impl NearestStrongMap {
    /// Scans square windows of radius `radius`, growing by `increment`.
    pub fn build(
        states: &[PixelState],
        width: usize,
        height: usize,
        radius: usize,
        increment: usize,
        device: Device,
    ) -> Self {
        let entries = device.map_range(width * height, |idx| {
            if states[idx] != PixelState::Weak {
                return None;
            }
            nearest_strong(states, width, height, idx % width, idx / width, radius, increment)
        });
        Self {
            width,
            height,
            entries,
        }
    }

    /// Nearest STRONG pixel of `(x, y)`, if the pixel is WEAK and one exists.
    pub fn get(&self, x: usize, y: usize) -> Option<(usize, usize)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.entries[y * self.width + x]
    }

    /// Euclidean distance from `(x, y)` to its nearest STRONG pixel.
    pub fn distance(&self, x: usize, y: usize) -> Option<f32> {
        self.get(x, y).map(|(sx, sy)| {
            let dx = sx as f32 - x as f32;
            let dy = sy as f32 - y as f32;
            (dx * dx + dy * dy).sqrt()
        })
    }
}

fn nearest_strong(
    states: &[PixelState],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    radius: usize,
    increment: usize,
) -> Option<(usize, usize)> {
    let limit = MAX_SEARCH_RADIUS.min(width.max(height));
    let mut scanned = None;
    let mut r = radius.max(1);
    loop {
        if let Some((found, dist_sq)) = scan_ring(states, width, height, x, y, scanned, r) {
            // Pixels outside the square are farther than `r`; a hit in the
            // corner may still lose to one just outside it.
            let reach = (dist_sq as f64).sqrt().ceil() as usize;
            if reach > r {
                let outer = scan_ring(states, width, height, x, y, Some(r), reach);
                return Some(closer(Some((found, dist_sq)), outer).map_or(found, |(p, _)| p));
            }
            return Some(found);
        }
        if r >= limit {
            return None;
        }
        scanned = Some(r);
        r = (r + increment.max(1)).min(limit);
    }
}

type Hit = ((usize, usize), usize);

/// Orders hits by squared distance, then row-major position.
fn closer(a: Option<Hit>, b: Option<Hit>) -> Option<Hit> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let key = |((sx, sy), d): Hit| (d, sy, sx);
            Some(if key(b) < key(a) { b } else { a })
        }
        (a, b) => a.or(b),
    }
}

/// Closest STRONG pixel whose Chebyshev distance from `(x, y)` lies in
/// `(inner, r]`, with its squared distance. `inner = None` includes the
/// centre.
fn scan_ring(
    states: &[PixelState],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    inner: Option<usize>,
    r: usize,
) -> Option<Hit> {
    let x0 = x.saturating_sub(r);
    let y0 = y.saturating_sub(r);
    let x1 = (x + r).min(width - 1);
    let y1 = (y + r).min(height - 1);
    let mut best: Option<Hit> = None;
    let mut visit = |sx: usize, sy: usize| {
        if states[sy * width + sx] == PixelState::Strong {
            let dist_sq = sx.abs_diff(x).pow(2) + sy.abs_diff(y).pow(2);
            best = closer(best, Some(((sx, sy), dist_sq)));
        }
    };
    for sy in y0..=y1 {
        match inner {
            Some(inner) if sy.abs_diff(y) <= inner => {
                // only the left and right strips of this row are new
                if let Some(left_end) = x.checked_sub(inner + 1) {
                    for sx in x0..=left_end {
                        visit(sx, sy);
                    }
                }
                for sx in (x + inner + 1)..=x1 {
                    visit(sx, sy);
                }
            }
            _ => {
                for sx in x0..=x1 {
                    visit(sx, sy);
                }
            }
        }
    }
    best
}
