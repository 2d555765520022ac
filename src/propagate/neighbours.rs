//! Fixed propagation sampling pattern.

/// Offsets of one sampling arm, ordered from near to far.
pub type Arm = Vec<(isize, isize)>;

/// Eight sampling arms around a pixel: four short V-shaped arms hugging the
/// pixel and four long straight arms reaching further out.
///
/// Every offset has odd `|dx| + |dy|`, so it always lands on the colour the
/// current pass does not write.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighbourPattern {
    arms: Vec<Arm>,
}

const NEAR_ARM: [(isize, isize); 6] = [(0, 1), (-1, 2), (1, 2), (0, 3), (-2, 3), (2, 3)];
const LONG_ARM_START: isize = 5;

impl NeighbourPattern {
    /// Builds the pattern with `arm_length` samples per long arm.
    pub fn checkerboard(arm_length: usize) -> Self {
        let long: Arm = (0..arm_length.max(1) as isize)
            .map(|i| (0, LONG_ARM_START + 2 * i))
            .collect();
        let near: Arm = NEAR_ARM.to_vec();

        let mut arms = Vec::with_capacity(8);
        for base in [&near, &long] {
            for quarter in 0..4 {
                arms.push(base.iter().map(|&o| rotate(o, quarter)).collect());
            }
        }
        Self { arms }
    }

    pub fn arms(&self) -> &[Arm] {
        &self.arms
    }

    /// Total number of offsets over all arms.
    pub fn len(&self) -> usize {
        self.arms.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }
}

/// Rotates an offset by `quarter * 90` degrees.
fn rotate((dx, dy): (isize, isize), quarter: usize) -> (isize, isize) {
    match quarter % 4 {
        0 => (dx, dy),
        1 => (-dy, dx),
        2 => (-dx, -dy),
        _ => (dy, -dx),
    }
}
