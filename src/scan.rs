//! Structured parallel-for over grid regions.
//!
//! Every whole-grid pass in the generation pipeline runs through this module.
//! A pass spins up a fresh bounded set of scoped worker threads, joins them
//! before returning, and guarantees disjoint tile ownership: one worker owns
//! a region exclusively for the duration of the pass, so visitors need no
//! locking for state keyed by their own tile.
//!
//! Two pass shapes exist:
//! - [`for_each_tile`] hands each visitor a `&mut Tile`; neighbour access is
//!   impossible by construction, which is exactly the safety contract.
//! - [`for_each_tile_ref`] hands visitors a shared `&TileGrid`; passes that
//!   must inspect neighbours (territory merging, calibration sampling) use
//!   this and buffer their writes for a later pass.
//!
//! Partitioning contract: the covering region list of the rect is ordered
//! row-major and split into `threads` contiguous runs whose lengths differ by
//! at most one, longer runs first. A worker visits only the tiles of its
//! regions that lie inside the rect, so ranges that do not align to region
//! boundaries still produce exact visit counts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::WorldError;
use crate::grid::{Region, TileGrid, TileRect, REGION_SIZE};
use crate::tile::Tile;

/// Hard cap on worker threads per pass.
pub const MAX_WORKERS: usize = 64;

/// How often the driving thread samples completion for progress reporting.
const PROGRESS_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug)]
pub struct ScanOptions {
    /// Requested worker count; clamped to `1..=MAX_WORKERS` and to the
    /// number of regions in the range.
    pub threads: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self { threads }
    }
}

impl ScanOptions {
    pub fn with_threads(threads: usize) -> Self {
        Self { threads }
    }
}

/// Snapshot passed to the progress callback.
#[derive(Clone, Copy, Debug)]
pub struct ScanProgress {
    /// Fraction of regions completed, in `[0, 1]`.
    pub fraction: f64,
    /// Wall-clock time since the pass started. Reported, never enforced.
    pub elapsed: Duration,
}

/// Progress callback; return `false` to cancel the pass. Invoked only from
/// the driving thread.
pub type ProgressFn<'a> = &'a mut dyn FnMut(ScanProgress) -> bool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    /// The progress callback returned `false`; workers were torn down at
    /// region granularity.
    Cancelled,
}

/// A per-tile visitor with exclusive access to its tile.
///
/// Visitors in a pass are applied in list order, all of them to a given tile
/// before the pass moves to the next tile.
pub trait TileVisitor: Sync {
    fn visit(&self, worker: usize, tile: &mut Tile, x: i32, y: i32);
}

impl<F> TileVisitor for F
where
    F: Fn(usize, &mut Tile, i32, i32) + Sync,
{
    fn visit(&self, worker: usize, tile: &mut Tile, x: i32, y: i32) {
        self(worker, tile, x, y)
    }
}

/// A read-only visitor with shared access to the whole grid (neighbour
/// reads allowed, no mutation).
pub trait TileRefVisitor: Sync {
    fn visit(&self, worker: usize, grid: &TileGrid, x: i32, y: i32);
}

impl<F> TileRefVisitor for F
where
    F: Fn(usize, &TileGrid, i32, i32) + Sync,
{
    fn visit(&self, worker: usize, grid: &TileGrid, x: i32, y: i32) {
        self(worker, grid, x, y)
    }
}

/// Split `total` work items into `threads` contiguous run lengths differing
/// by at most one, longer runs first.
fn partition(total: usize, threads: usize) -> Vec<usize> {
    let t = threads.clamp(1, MAX_WORKERS).min(total).max(1);
    let base = total / t;
    let extra = total % t;
    (0..t)
        .map(|w| base + usize::from(w < extra))
        .filter(|len| *len > 0)
        .collect()
}

fn visit_region_tiles(
    worker: usize,
    region: &mut Region,
    rect: &TileRect,
    visitors: &[&dyn TileVisitor],
) {
    let (ox, oy) = region.origin();
    let x0 = rect.x.max(ox);
    let y0 = rect.y.max(oy);
    let x1 = rect.right().min(ox + REGION_SIZE as i32);
    let y1 = rect.bottom().min(oy + REGION_SIZE as i32);

    for y in y0..y1 {
        for x in x0..x1 {
            let tile = region.tile_mut((x - ox) as usize, (y - oy) as usize);
            for v in visitors {
                v.visit(worker, tile, x, y);
            }
        }
    }
}

fn visit_region_tiles_ref(
    worker: usize,
    grid: &TileGrid,
    origin: (i32, i32),
    rect: &TileRect,
    visitors: &[&dyn TileRefVisitor],
) {
    let (ox, oy) = origin;
    let x0 = rect.x.max(ox);
    let y0 = rect.y.max(oy);
    let x1 = rect.right().min(ox + REGION_SIZE as i32);
    let y1 = rect.bottom().min(oy + REGION_SIZE as i32);

    for y in y0..y1 {
        for x in x0..x1 {
            for v in visitors {
                v.visit(worker, grid, x, y);
            }
        }
    }
}

/// Drive the progress callback from the calling thread until all regions are
/// done or the callback cancels.
fn poll_progress(
    progress: &mut dyn FnMut(ScanProgress) -> bool,
    done: &AtomicUsize,
    cancel: &AtomicBool,
    total: usize,
    start: Instant,
) {
    loop {
        let d = done.load(Ordering::Acquire);
        let keep_going = progress(ScanProgress {
            fraction: d as f64 / total as f64,
            elapsed: start.elapsed(),
        });
        if !keep_going {
            cancel.store(true, Ordering::Release);
            return;
        }
        if d >= total {
            return;
        }
        thread::sleep(PROGRESS_POLL);
    }
}

/// Apply every visitor, in list order, to every tile of `rect`.
///
/// With a progress callback the driving thread polls completion and all
/// partitions run on spawned workers; without one the driving thread takes
/// the last partition itself (zero progress overhead).
pub fn for_each_tile(
    grid: &mut TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    visitors: &[&dyn TileVisitor],
    mut progress: Option<ProgressFn<'_>>,
) -> Result<ScanOutcome, WorldError> {
    rect.validate(grid)?;

    let indices = grid.region_indices_in(&rect);
    let total = indices.len();
    let run_lengths = partition(total, opts.threads);

    // Row-major region order; membership by region coordinates keeps this a
    // single filtered sweep over the backing slice.
    let mut wanted = vec![false; grid.region_count()];
    for &idx in &indices {
        wanted[idx] = true;
    }
    let mut refs: Vec<&mut Region> = grid
        .regions_mut()
        .iter_mut()
        .enumerate()
        .filter(|(i, _)| wanted[*i])
        .map(|(_, r)| r)
        .collect();

    let start = Instant::now();
    let done = AtomicUsize::new(0);
    let cancel = AtomicBool::new(false);

    thread::scope(|s| {
        let done = &done;
        let cancel = &cancel;
        let rect = &rect;

        let mut chunks = Vec::with_capacity(run_lengths.len());
        for len in &run_lengths {
            let rest = refs.split_off(*len);
            chunks.push(std::mem::replace(&mut refs, rest));
        }

        let polling = progress.is_some();
        let last = chunks.len() - 1;
        let mut own_chunk = None;

        for (worker, chunk) in chunks.into_iter().enumerate() {
            if !polling && worker == last {
                own_chunk = Some((worker, chunk));
                continue;
            }
            s.spawn(move || {
                for region in chunk {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    visit_region_tiles(worker, region, rect, visitors);
                    done.fetch_add(1, Ordering::Release);
                }
            });
        }

        if let Some((worker, chunk)) = own_chunk {
            for region in chunk {
                visit_region_tiles(worker, region, rect, visitors);
                done.fetch_add(1, Ordering::Release);
            }
        } else if let Some(cb) = progress.as_mut() {
            poll_progress(&mut **cb, done, cancel, total, start);
        }
    });

    if cancel.load(Ordering::Acquire) {
        Ok(ScanOutcome::Cancelled)
    } else {
        Ok(ScanOutcome::Completed)
    }
}

/// Read-only counterpart of [`for_each_tile`]: visitors share the grid and
/// may inspect any tile, including neighbours, but cannot mutate.
pub fn for_each_tile_ref(
    grid: &TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    visitors: &[&dyn TileRefVisitor],
    mut progress: Option<ProgressFn<'_>>,
) -> Result<ScanOutcome, WorldError> {
    rect.validate(grid)?;

    let indices = grid.region_indices_in(&rect);
    let total = indices.len();
    let run_lengths = partition(total, opts.threads);

    let start = Instant::now();
    let done = AtomicUsize::new(0);
    let cancel = AtomicBool::new(false);

    thread::scope(|s| {
        let done = &done;
        let cancel = &cancel;
        let rect = &rect;
        let indices = &indices;

        let polling = progress.is_some();
        let last = run_lengths.len() - 1;
        let mut offset = 0usize;
        let mut own_range = None;

        for (worker, len) in run_lengths.iter().enumerate() {
            let range = offset..offset + len;
            offset += len;
            if !polling && worker == last {
                own_range = Some((worker, range));
                continue;
            }
            s.spawn(move || {
                for &idx in &indices[range] {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let origin = grid.regions()[idx].origin();
                    visit_region_tiles_ref(worker, grid, origin, rect, visitors);
                    done.fetch_add(1, Ordering::Release);
                }
            });
        }

        if let Some((worker, range)) = own_range {
            for &idx in &indices[range] {
                let origin = grid.regions()[idx].origin();
                visit_region_tiles_ref(worker, grid, origin, rect, visitors);
                done.fetch_add(1, Ordering::Release);
            }
        } else if let Some(cb) = progress.as_mut() {
            poll_progress(&mut **cb, done, cancel, total, start);
        }
    });

    if cancel.load(Ordering::Acquire) {
        Ok(ScanOutcome::Cancelled)
    } else {
        Ok(ScanOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_grid() -> TileGrid {
        TileGrid::new(3, 2).unwrap()
    }

    #[test]
    fn test_visit_count_exact_for_all_thread_counts() {
        for threads in [1, 2, 3, 8, 100] {
            let mut grid = counting_grid();
            let rect = TileRect::full(&grid);
            let count = AtomicU64::new(0);
            let visitor = |_w: usize, _t: &mut Tile, _x: i32, _y: i32| {
                count.fetch_add(1, Ordering::Relaxed);
            };
            for_each_tile(
                &mut grid,
                rect,
                ScanOptions::with_threads(threads),
                &[&visitor],
                None,
            )
            .unwrap();
            assert_eq!(count.load(Ordering::Relaxed), rect.area());
        }
    }

    #[test]
    fn test_unaligned_rect_visits_exactly_once() {
        // Straddles region boundaries on both axes and does not cover any
        // region fully.
        let mut grid = counting_grid();
        let rect = TileRect::new(17, 9, 41, 39);
        let marker = |_w: usize, tile: &mut Tile, _x: i32, _y: i32| {
            tile.scratch += 1.0;
        };
        for_each_tile(
            &mut grid,
            rect,
            ScanOptions::with_threads(5),
            &[&marker],
            None,
        )
        .unwrap();

        let mut visited = 0u64;
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let s = grid.tile(x, y).scratch;
                if rect.contains(x, y) {
                    assert_eq!(s, 1.0, "tile {x},{y} visited {s} times");
                    visited += 1;
                } else {
                    assert_eq!(s, 0.0, "tile {x},{y} outside rect was touched");
                }
            }
        }
        assert_eq!(visited, rect.area());
    }

    #[test]
    fn test_single_thread_matches_parallel_state() {
        let run = |threads: usize| -> Vec<f64> {
            let mut grid = counting_grid();
            let rect = TileRect::full(&grid);
            let visitor = |_w: usize, tile: &mut Tile, x: i32, y: i32| {
                tile.height = (x * 31 + y) as f64;
                tile.scratch = tile.height * 0.5;
            };
            for_each_tile(
                &mut grid,
                rect,
                ScanOptions::with_threads(threads),
                &[&visitor],
                None,
            )
            .unwrap();
            (0..grid.height())
                .flat_map(|y| (0..grid.width()).map(move |x| (x, y)))
                .map(|(x, y)| grid.tile(x, y).height + grid.tile(x, y).scratch)
                .collect()
        };
        assert_eq!(run(1), run(8));
    }

    #[test]
    fn test_visitors_applied_in_order_per_tile() {
        let mut grid = counting_grid();
        let first = |_w: usize, tile: &mut Tile, _x: i32, _y: i32| {
            tile.height = 1.0;
        };
        let second = |_w: usize, tile: &mut Tile, _x: i32, _y: i32| {
            // Sees the first visitor's write for the same tile.
            assert_eq!(tile.height, 1.0);
            tile.height = 2.0;
        };
        for_each_tile(
            &mut grid,
            TileRect::full(&grid),
            ScanOptions::with_threads(4),
            &[&first, &second],
            None,
        )
        .unwrap();
        assert_eq!(grid.tile(0, 0).height, 2.0);
    }

    #[test]
    fn test_partition_contract() {
        assert_eq!(partition(6, 4), vec![2, 2, 1, 1]);
        assert_eq!(partition(3, 8), vec![1, 1, 1]);
        assert_eq!(partition(1, 1), vec![1]);
        // Clamped to MAX_WORKERS.
        assert_eq!(partition(1000, 10_000).len(), MAX_WORKERS);
    }

    #[test]
    fn test_empty_rect_rejected() {
        let mut grid = counting_grid();
        let err = for_each_tile(
            &mut grid,
            TileRect::new(0, 0, 0, 0),
            ScanOptions::default(),
            &[],
            None,
        )
        .unwrap_err();
        assert_eq!(err, WorldError::EmptyRange);
    }

    #[test]
    fn test_progress_reports_and_completes() {
        let mut grid = counting_grid();
        let noop = |_w: usize, _t: &mut Tile, _x: i32, _y: i32| {};
        let mut fractions = Vec::new();
        let outcome = for_each_tile(
            &mut grid,
            TileRect::full(&grid),
            ScanOptions::with_threads(2),
            &[&noop],
            Some(&mut |p: ScanProgress| {
                fractions.push(p.fraction);
                true
            }),
        )
        .unwrap();
        assert_eq!(outcome, ScanOutcome::Completed);
        assert!(!fractions.is_empty());
        assert!((fractions.last().unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
    }

    #[test]
    fn test_cancellation_tears_down() {
        let mut grid = counting_grid();
        let slow = |_w: usize, _t: &mut Tile, _x: i32, _y: i32| {
            std::hint::black_box(0u64);
        };
        let outcome = for_each_tile(
            &mut grid,
            TileRect::full(&grid),
            ScanOptions::with_threads(2),
            &[&slow],
            Some(&mut |_p: ScanProgress| false),
        )
        .unwrap();
        assert_eq!(outcome, ScanOutcome::Cancelled);
        // Reaching here at all means the worker scope joined cleanly.
    }

    #[test]
    fn test_ref_scan_sees_neighbours() {
        let mut grid = counting_grid();
        grid.tile_mut(0, 0).height = 7.0;
        let sum = AtomicU64::new(0);
        let visitor = |_w: usize, g: &TileGrid, x: i32, y: i32| {
            // Neighbour read across the wrap seam is legal here.
            let left = g.tile(x - 1, y).height;
            if left == 7.0 {
                sum.fetch_add(1, Ordering::Relaxed);
            }
        };
        for_each_tile_ref(
            &grid,
            TileRect::full(&grid),
            ScanOptions::with_threads(3),
            &[&visitor],
            None,
        )
        .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 1);
    }
}
