//! Per-pixel view selection.
//!
//! Every pixel keeps a bitmask of the `top_k` source slots whose cost for the
//! accepted hypothesis was lowest, plus a cache of those per-view costs.
//! Bits index source slots, never image ids, so the reference image can
//! never be selected.

pub mod topk;

use crate::cost::ViewCosts;
use crate::util::error::try_alloc;
use crate::util::ApdResult;

pub use topk::{TopK, ViewRank};

/// Returns the mask of the `k` lowest-cost views; ties go to the lower image id.
///
/// The mask always has `min(k, costs.len())` bits set, including views
/// whose cost is invalid, so the aggregate stays comparable between
/// hypotheses.
pub fn select_top_k(costs: &ViewCosts, image_ids: &[u32], k: usize) -> u32 {
    let mut top = TopK::new(k);
    for (slot, (&cost, &image_id)) in costs.as_slice().iter().zip(image_ids).enumerate() {
        top.push(ViewRank {
            slot,
            image_id,
            cost,
        });
    }
    top.mask()
}

/// Selected-view bitmasks and per-view cost cache of a whole image.
pub struct ViewSelector {
    width: usize,
    top_k: usize,
    image_ids: Vec<u32>,
    selected: Vec<u32>,
    cache: Vec<f32>,
}

impl ViewSelector {
    pub fn new(
        width: usize,
        height: usize,
        image_ids: Vec<u32>,
        top_k: usize,
        problem: usize,
    ) -> ApdResult<Self> {
        let len = width * height;
        let views = image_ids.len();
        Ok(Self {
            width,
            top_k,
            selected: try_alloc(len, 0u32, problem, "view selection")?,
            cache: try_alloc(len * views.max(1), f32::INFINITY, problem, "view selection")?,
            image_ids,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn num_views(&self) -> usize {
        self.image_ids.len()
    }

    /// Source image ids in slot order.
    pub fn image_ids(&self) -> &[u32] {
        &self.image_ids
    }

    /// Selected-view bitmask of every pixel, row-major.
    pub fn selected(&self) -> &[u32] {
        &self.selected
    }

    pub fn mask(&self, x: usize, y: usize) -> u32 {
        self.selected[y * self.width + x]
    }

    /// Image ids selected at `(x, y)`, in slot order.
    pub fn selected_ids(&self, x: usize, y: usize) -> Vec<u32> {
        let mask = self.mask(x, y);
        self.image_ids
            .iter()
            .enumerate()
            .filter(|(slot, _)| mask & (1u32 << slot) != 0)
            .map(|(_, &id)| id)
            .collect()
    }

    /// Cached per-view costs of the accepted hypothesis at `(x, y)`.
    pub fn cached_costs(&self, x: usize, y: usize) -> ViewCosts {
        let views = self.num_views();
        let start = (y * self.width + x) * views;
        ViewCosts::from_slice(&self.cache[start..start + views])
    }

    /// Stores `costs` for pixel `idx` and reselects its views. Returns the new mask.
    pub fn update(&mut self, idx: usize, costs: &ViewCosts) -> u32 {
        let views = self.num_views();
        let mask = select_top_k(costs, &self.image_ids, self.top_k);
        self.selected[idx] = mask;
        self.cache[idx * views..(idx + 1) * views].copy_from_slice(costs.as_slice());
        mask
    }

    /// Splits the buffers into per-row slices for a pass.
    pub(crate) fn rows_mut(&mut self) -> Vec<ViewRow<'_>> {
        let views = self.num_views().max(1);
        let top_k = self.top_k;
        let ids = &self.image_ids;
        self.selected
            .chunks_mut(self.width)
            .zip(self.cache.chunks_mut(self.width * views))
            .map(|(selected, cache)| ViewRow {
                image_ids: ids,
                top_k,
                selected,
                cache,
            })
            .collect()
    }
}

/// Exclusive view-selection state of one image row.
pub(crate) struct ViewRow<'a> {
    image_ids: &'a [u32],
    top_k: usize,
    selected: &'a mut [u32],
    cache: &'a mut [f32],
}

impl ViewRow<'_> {
    pub(crate) fn mask(&self, x: usize) -> u32 {
        self.selected[x]
    }

    pub(crate) fn cached_costs(&self, x: usize) -> ViewCosts {
        let views = self.image_ids.len();
        ViewCosts::from_slice(&self.cache[x * views..(x + 1) * views])
    }

    pub(crate) fn update(&mut self, x: usize, costs: &ViewCosts) -> u32 {
        let views = self.image_ids.len();
        let mask = select_top_k(costs, self.image_ids, self.top_k);
        self.selected[x] = mask;
        self.cache[x * views..(x + 1) * views].copy_from_slice(costs.as_slice());
        mask
    }
}
