//! Top-K tracking of the lowest-cost source views.

use crate::problem::MAX_SOURCE_IMAGES;
use std::cmp::Ordering;

/// One source view ranked by its cost at a pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewRank {
    /// Position of the view in the problem's source list.
    pub slot: usize,
    pub image_id: u32,
    pub cost: f32,
}

impl ViewRank {
    const EMPTY: ViewRank = ViewRank {
        slot: 0,
        image_id: 0,
        cost: f32::INFINITY,
    };
}

fn rank_cmp_asc(a: &ViewRank, b: &ViewRank) -> Ordering {
    a.cost
        .total_cmp(&b.cost)
        .then_with(|| a.image_id.cmp(&b.image_id))
}

/// Top-K container with O(k) insertion and no heap allocation.
pub struct TopK {
    k: usize,
    len: usize,
    items: [ViewRank; MAX_SOURCE_IMAGES],
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.min(MAX_SOURCE_IMAGES),
            len: 0,
            items: [ViewRank::EMPTY; MAX_SOURCE_IMAGES],
        }
    }

    /// Pushes a view, evicting the worst-ranked one if at capacity.
    pub fn push(&mut self, rank: ViewRank) {
        if self.k == 0 {
            return;
        }
        if self.len < self.k {
            self.items[self.len] = rank;
            self.len += 1;
            return;
        }

        let mut worst_idx = 0usize;
        for idx in 1..self.len {
            if rank_cmp_asc(&self.items[idx], &self.items[worst_idx]) == Ordering::Greater {
                worst_idx = idx;
            }
        }

        if rank_cmp_asc(&rank, &self.items[worst_idx]) == Ordering::Less {
            self.items[worst_idx] = rank;
        }
    }

    /// Bitmask of the retained slots.
    pub fn mask(&self) -> u32 {
        self.items[..self.len]
            .iter()
            .fold(0u32, |mask, r| mask | (1u32 << r.slot))
    }

    /// Retained views sorted by ascending cost, ties by image id.
    pub fn into_sorted(mut self) -> Vec<ViewRank> {
        let items = &mut self.items[..self.len];
        items.sort_by(rank_cmp_asc);
        items.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::{TopK, ViewRank};

    fn rank(slot: usize, image_id: u32, cost: f32) -> ViewRank {
        ViewRank {
            slot,
            image_id,
            cost,
        }
    }

    #[test]
    fn keeps_lowest_costs() {
        let mut top = TopK::new(2);
        top.push(rank(0, 10, 0.5));
        top.push(rank(1, 11, 0.1));
        top.push(rank(2, 12, 0.3));
        assert_eq!(top.mask(), 0b110);
        let sorted = top.into_sorted();
        assert_eq!(sorted[0].slot, 1);
        assert_eq!(sorted[1].slot, 2);
    }

    #[test]
    fn ties_prefer_lower_image_id() {
        let mut top = TopK::new(1);
        top.push(rank(0, 9, 0.2));
        top.push(rank(1, 4, 0.2));
        top.push(rank(2, 7, 0.2));
        assert_eq!(top.mask(), 0b010);
    }
}
