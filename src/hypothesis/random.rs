//! Per-pixel pseudo-random generator states.

use crate::util::error::try_alloc;
use crate::util::ApdResult;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// One independent generator per pixel, row-major.
///
/// Each state is derived from the base seed and the pixel index, so the
/// sequence a pixel sees does not depend on how rows are scheduled.
pub struct RandomField {
    width: usize,
    states: Vec<SmallRng>,
}

impl RandomField {
    /// Seeds `width * height` generators from `seed`.
    pub fn new(width: usize, height: usize, seed: u64, problem: usize) -> ApdResult<Self> {
        let mut states = try_alloc(
            width * height,
            SmallRng::seed_from_u64(0),
            problem,
            "random field",
        )?;
        for (idx, state) in states.iter_mut().enumerate() {
            let mixed = seed ^ (idx as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            *state = SmallRng::seed_from_u64(splitmix64(mixed));
        }
        Ok(Self { width, states })
    }

    /// Generator of pixel `(x, y)`.
    pub fn at(&mut self, x: usize, y: usize) -> &mut SmallRng {
        &mut self.states[y * self.width + x]
    }

    /// Mutable rows, one slice of `width` generators per image row.
    pub(crate) fn rows_mut(&mut self) -> std::slice::ChunksMut<'_, SmallRng> {
        self.states.chunks_mut(self.width.max(1))
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
