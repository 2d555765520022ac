//! Bilaterally weighted normalized cross-correlation.

use super::{CostContext, MatchingCost, ViewGeometry, UNTEXTURED_COST};
use crate::problem::RunParameters;
use crate::util::math::bilinear;

const VARIANCE_EPS: f32 = 1.0e-5;

/// `1 - NCC` over a window warped by the plane homography.
///
/// Window samples are weighted by their distance to the centre and by
/// their intensity difference to the centre pixel, which keeps the score
/// from bleeding across depth edges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BilateralNcc {
    pub sigma_spatial: f32,
    pub sigma_color: f32,
}

impl Default for BilateralNcc {
    fn default() -> Self {
        Self::from_params(&RunParameters::default())
    }
}

impl BilateralNcc {
    pub fn new(sigma_spatial: f32, sigma_color: f32) -> Self {
        Self {
            sigma_spatial,
            sigma_color,
        }
    }

    pub fn from_params(params: &RunParameters) -> Self {
        Self::new(params.sigma_spatial, params.sigma_color)
    }

    #[inline]
    fn weight(&self, dx: isize, dy: isize, delta: f32) -> f32 {
        let spatial = ((dx * dx + dy * dy) as f32).sqrt();
        (-spatial / (2.0 * self.sigma_spatial * self.sigma_spatial)
            - delta.abs() / (2.0 * self.sigma_color * self.sigma_color))
            .exp()
    }
}

impl MatchingCost for BilateralNcc {
    fn view_cost(&self, ctx: &CostContext<'_>) -> f32 {
        let reference = &ctx.scene.reference;
        let src = ctx.source().image.view();
        let (width, height) = reference.dims();
        let centre = reference.at(ctx.x, ctx.y);

        let mut sum_w = 0.0f32;
        let mut sum_r = 0.0f32;
        let mut sum_s = 0.0f32;
        let mut sum_rr = 0.0f32;
        let mut sum_ss = 0.0f32;
        let mut sum_rs = 0.0f32;

        for (dx, dy) in ctx.window.offsets() {
            let px = ctx.x as isize + dx;
            let py = ctx.y as isize + dy;
            if px < 0 || py < 0 || px >= width as isize || py >= height as isize {
                continue;
            }
            let r = reference.at(px as usize, py as usize);
            let Some(p) = ViewGeometry::apply(&ctx.homography, px as f32, py as f32) else {
                continue;
            };
            let s = bilinear(&src, p.x, p.y);
            let w = self.weight(dx, dy, r - centre);

            sum_w += w;
            sum_r += w * r;
            sum_s += w * s;
            sum_rr += w * r * r;
            sum_ss += w * s * s;
            sum_rs += w * r * s;
        }

        if sum_w <= f32::EPSILON {
            return UNTEXTURED_COST;
        }
        let mean_r = sum_r / sum_w;
        let mean_s = sum_s / sum_w;
        let var_r = sum_rr / sum_w - mean_r * mean_r;
        let var_s = sum_ss / sum_w - mean_s * mean_s;
        if var_r < VARIANCE_EPS || var_s < VARIANCE_EPS {
            return UNTEXTURED_COST;
        }
        let cov = sum_rs / sum_w - mean_r * mean_s;
        let ncc = cov / (var_r * var_s).sqrt();
        (1.0 - ncc).clamp(0.0, 2.0)
    }
}
