//! Threshold calibration by histogram-bucketed bisection.
//!
//! Turns a target coverage fraction into a concrete field threshold: the
//! value below which approximately that fraction of sampled tiles fall. Each
//! round buckets the current value range, tallies one parallel pass over the
//! grid, and narrows the range to the single bucket straddling the target.
//! Several independent calibrations share each grid pass, so deriving the
//! sea, alpine and forest levels costs one scan per round, not three.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::WorldError;
use crate::grid::{TileGrid, TileRect};
use crate::scan::{self, ScanOptions};

/// Cap on narrowing rounds; with a sane bucket count convergence is
/// logarithmic and never gets near this.
const MAX_ROUNDS: usize = 48;

/// A scalar sampling function over the grid.
pub type SampleFn<'a> = &'a (dyn Fn(&TileGrid, i32, i32) -> f64 + Sync);

/// One threshold being searched for.
pub struct Calibration<'a> {
    sample: SampleFn<'a>,
    target: f64,
    epsilon: f64,
    lo: f64,
    hi: f64,
    converged: bool,
}

impl<'a> Calibration<'a> {
    /// `target` is the desired below-threshold fraction in `(0, 1)`;
    /// `[lo, hi]` must bracket the field's value range.
    pub fn new(
        sample: SampleFn<'a>,
        target: f64,
        epsilon: f64,
        lo: f64,
        hi: f64,
    ) -> Result<Self, WorldError> {
        if !(0.0..=1.0).contains(&target) || !target.is_finite() {
            return Err(WorldError::InvalidCalibration(
                "target fraction must lie in [0, 1]",
            ));
        }
        if !(epsilon > 0.0) {
            return Err(WorldError::InvalidCalibration("epsilon must be positive"));
        }
        if !(lo < hi) || !lo.is_finite() || !hi.is_finite() {
            return Err(WorldError::InvalidCalibration(
                "value range must be finite and ordered",
            ));
        }
        Ok(Self {
            sample,
            target,
            epsilon,
            lo,
            hi,
            converged: false,
        })
    }

    /// Midpoint of the current interval; the calibrated threshold once
    /// [`calibrate`] returns.
    pub fn value(&self) -> f64 {
        (self.lo + self.hi) * 0.5
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Run all calibrations to convergence, sharing one grid pass per round.
///
/// Returns the threshold for each calibration in input order. A degenerate
/// `bucket_count` (< 2) cannot narrow; the result is then the bounded,
/// deterministic midpoint of the initial interval.
pub fn calibrate(
    grid: &TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    calibrations: &mut [Calibration<'_>],
    bucket_count: usize,
) -> Result<Vec<f64>, WorldError> {
    rect.validate(grid)?;
    let total = rect.area() as f64;

    for _ in 0..MAX_ROUNDS {
        let active: Vec<usize> = calibrations
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.converged)
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() || bucket_count < 2 {
            break;
        }

        // Per calibration: bucket_count bins plus below/above overflow.
        let tallies: Vec<Vec<AtomicU64>> = active
            .iter()
            .map(|_| (0..bucket_count + 2).map(|_| AtomicU64::new(0)).collect())
            .collect();
        let windows: Vec<(SampleFn<'_>, f64, f64)> = active
            .iter()
            .map(|&i| {
                let c = &calibrations[i];
                (c.sample, c.lo, c.hi)
            })
            .collect();

        let visitor = |_worker: usize, grid: &TileGrid, x: i32, y: i32| {
            for (k, &(sample, lo, hi)) in windows.iter().enumerate() {
                let v = sample(grid, x, y);
                let width = (hi - lo) / bucket_count as f64;
                let bin = if v < lo {
                    0
                } else if v >= hi {
                    bucket_count + 1
                } else {
                    1 + (((v - lo) / width) as usize).min(bucket_count - 1)
                };
                tallies[k][bin].fetch_add(1, Ordering::Relaxed);
            }
        };
        scan::for_each_tile_ref(grid, rect, opts, &[&visitor], None)?;

        let mut narrowed = false;
        for (k, &i) in active.iter().enumerate() {
            let c = &mut calibrations[i];
            let width = (c.hi - c.lo) / bucket_count as f64;

            // Walk bins from the top, accumulating the at-or-above fraction
            // until it crosses the target's complement; that bin straddles
            // the threshold.
            let mut running = tallies[k][bucket_count + 1].load(Ordering::Relaxed);
            let mut straddle = 0usize;
            for bin in (0..bucket_count).rev() {
                running += tallies[k][bin + 1].load(Ordering::Relaxed);
                if running as f64 / total > 1.0 - c.target {
                    straddle = bin;
                    break;
                }
            }

            let new_lo = c.lo + straddle as f64 * width;
            let new_hi = new_lo + width;
            if new_hi - new_lo < c.hi - c.lo {
                narrowed = true;
            }
            c.lo = new_lo;
            c.hi = new_hi;
            if (c.hi - c.lo) * 0.5 <= c.epsilon {
                c.converged = true;
            }
        }

        if !narrowed {
            break;
        }
    }

    Ok(calibrations.iter().map(|c| c.value()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grid whose heights are a known uniform ramp 0..n-1.
    fn ramp_grid() -> TileGrid {
        let mut grid = TileGrid::new(2, 2).unwrap();
        let w = grid.width();
        for y in 0..grid.height() {
            for x in 0..w {
                grid.tile_mut(x, y).height = (y * w + x) as f64;
            }
        }
        grid
    }

    #[test]
    fn test_median_of_uniform_ramp() {
        let grid = ramp_grid();
        let rect = TileRect::full(&grid);
        let n = rect.area() as f64;
        let sample: SampleFn<'_> = &|g: &TileGrid, x: i32, y: i32| g.tile(x, y).height;

        // With 4096 distinct integer heights, every threshold in
        // (n/2 - 1, n/2] splits the field exactly in half; convergence means
        // landing inside that window, up to epsilon.
        for epsilon in [4.0, 1.0, 0.05] {
            let mut cals =
                [Calibration::new(sample, 0.5, epsilon, 0.0, n - 1.0).unwrap()];
            let values =
                calibrate(&grid, rect, ScanOptions::with_threads(4), &mut cals, 32).unwrap();
            let (win_lo, win_hi) = (n * 0.5 - 1.0, n * 0.5);
            assert!(
                values[0] > win_lo - epsilon && values[0] <= win_hi + epsilon,
                "eps {epsilon}: got {} want ({win_lo}, {win_hi}]",
                values[0]
            );
        }
    }

    #[test]
    fn test_shared_pass_multiple_targets() {
        let grid = ramp_grid();
        let rect = TileRect::full(&grid);
        let n = rect.area() as f64;
        let sample: SampleFn<'_> = &|g: &TileGrid, x: i32, y: i32| g.tile(x, y).height;

        let mut cals = [
            Calibration::new(sample, 0.25, 0.5, 0.0, n - 1.0).unwrap(),
            Calibration::new(sample, 0.75, 0.5, 0.0, n - 1.0).unwrap(),
        ];
        let values =
            calibrate(&grid, rect, ScanOptions::with_threads(2), &mut cals, 16).unwrap();
        assert!((values[0] - n * 0.25).abs() < n * 0.02);
        assert!((values[1] - n * 0.75).abs() < n * 0.02);
        assert!(values[0] < values[1]);
    }

    #[test]
    fn test_degenerate_bucket_count_is_bounded() {
        let grid = ramp_grid();
        let rect = TileRect::full(&grid);
        let sample: SampleFn<'_> = &|g: &TileGrid, x: i32, y: i32| g.tile(x, y).height;

        let mut cals = [Calibration::new(sample, 0.5, 0.01, 0.0, 100.0).unwrap()];
        let values = calibrate(&grid, rect, ScanOptions::with_threads(1), &mut cals, 1).unwrap();
        // No narrowing possible; still the deterministic midpoint.
        assert_eq!(values[0], 50.0);
        assert!(!cals[0].converged());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let sample: SampleFn<'_> = &|_: &TileGrid, _: i32, _: i32| 0.0;
        assert!(Calibration::new(sample, 1.5, 0.1, 0.0, 1.0).is_err());
        assert!(Calibration::new(sample, 0.5, 0.0, 0.0, 1.0).is_err());
        assert!(Calibration::new(sample, 0.5, 0.1, 2.0, 1.0).is_err());
    }

    #[test]
    fn test_coordinate_sampler() {
        // Sampling functions need not read tile fields at all.
        let grid = TileGrid::new(2, 2).unwrap();
        let rect = TileRect::full(&grid);
        let w = grid.width() as f64;
        let sample: SampleFn<'_> = &move |_: &TileGrid, x: i32, _: i32| x as f64 / w;

        let mut cals = [Calibration::new(sample, 0.5, 0.01, 0.0, 1.0).unwrap()];
        let values =
            calibrate(&grid, rect, ScanOptions::with_threads(3), &mut cals, 64).unwrap();
        assert!((values[0] - 0.5).abs() < 0.05);
    }
}
