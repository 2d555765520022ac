//! Compute device selection and per-row dispatch.
//!
//! A dispatch hands every row of a pass to a worker and returns only when all
//! rows are done; that return is the barrier between passes. Rows own
//! disjoint `&mut` slices of the per-pixel buffers, so no locks are needed.

use crate::util::{ApdError, ApdResult};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Where per-pixel work runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    /// Single-threaded, in row order.
    Serial,
    /// Rayon worker pool (falls back to serial without the `rayon` feature).
    #[default]
    Parallel,
}

impl Device {
    /// Selects the device once at startup.
    ///
    /// `threads = Some(n)` configures the global worker pool with `n` threads;
    /// `Some(1)` selects the serial device.
    pub fn select(threads: Option<usize>) -> ApdResult<Device> {
        match threads {
            Some(0) => Err(ApdError::config("thread count must be at least 1")),
            Some(1) => Ok(Device::Serial),
            #[cfg(feature = "rayon")]
            Some(n) => {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build_global()
                    .map_err(|err| ApdError::Device {
                        reason: err.to_string(),
                    })?;
                Ok(Device::Parallel)
            }
            #[cfg(not(feature = "rayon"))]
            Some(_) => Ok(Device::Serial),
            None => Ok(Device::Parallel),
        }
    }

    /// Returns true when work is actually spread over threads.
    pub fn is_parallel(self) -> bool {
        cfg!(feature = "rayon") && self == Device::Parallel
    }

    /// Runs `f` on every row bundle and blocks until all complete.
    pub(crate) fn for_each_row<R, F>(self, rows: Vec<R>, f: F)
    where
        R: Send,
        F: Fn(R) + Sync + Send,
    {
        #[cfg(feature = "rayon")]
        if self.is_parallel() {
            rows.into_par_iter().for_each(f);
            return;
        }
        rows.into_iter().for_each(f);
    }

    /// Evaluates `f(i)` for `i in 0..len` and collects the results in order.
    pub(crate) fn map_range<T, F>(self, len: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        #[cfg(feature = "rayon")]
        if self.is_parallel() {
            return (0..len).into_par_iter().map(f).collect();
        }
        (0..len).map(f).collect()
    }
}
