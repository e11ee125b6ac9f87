//! The particle walk and the region-budgeted drop drivers.
//!
//! Two execution modes share one walk implementation through the [`Surface`]
//! trait. Sequential mode mutates the grid in place, so a particle feels its
//! own erosion. Parallel mode walks batches of particles against a height
//! snapshot and merges their buffered deltas in particle order afterwards;
//! with per-particle derived seeds this is deterministic for a fixed seed
//! and thread count.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::f64::consts::TAU;
use std::time::Instant;

use super::{ErosionParams, ErosionStats};
use crate::error::WorldError;
use crate::grid::{TileGrid, TileRect, REGION_SIZE};
use crate::scan::{ProgressFn, ScanOptions, ScanProgress};

/// Particles per parallel batch; a snapshot is taken per batch.
const BATCH: usize = 4096;

/// Height field a particle walks on. Reads may fail (missing tile) and the
/// walk treats that as a stop condition, never an error.
trait Surface {
    fn dims(&self) -> (i32, i32);
    fn height(&self, x: i32, y: i32) -> Option<f64>;
    /// Add a signed height delta at a wrapped tile.
    fn deposit(&mut self, x: i32, y: i32, delta: f64);
    fn add_moisture(&mut self, x: i32, y: i32);
}

struct GridSurface<'a> {
    grid: &'a mut TileGrid,
}

impl Surface for GridSurface<'_> {
    fn dims(&self) -> (i32, i32) {
        (self.grid.width(), self.grid.height())
    }

    fn height(&self, x: i32, y: i32) -> Option<f64> {
        self.grid.try_tile(x, y).map(|t| t.height)
    }

    fn deposit(&mut self, x: i32, y: i32, delta: f64) {
        self.grid.tile_mut(x, y).height += delta;
    }

    fn add_moisture(&mut self, x: i32, y: i32) {
        self.grid.tile_mut(x, y).moisture += 1.0;
    }
}

/// Immutable height snapshot plus buffered writes, for the parallel mode.
struct SnapshotSurface<'a> {
    heights: &'a [f64],
    width: i32,
    height: i32,
    deltas: Vec<(u32, f64)>,
    moisture: Vec<u32>,
}

impl<'a> SnapshotSurface<'a> {
    fn new(heights: &'a [f64], width: i32, height: i32) -> Self {
        Self {
            heights,
            width,
            height,
            deltas: Vec::new(),
            moisture: Vec::new(),
        }
    }

    fn index(&self, x: i32, y: i32) -> u32 {
        let x = x.rem_euclid(self.width);
        let y = y.rem_euclid(self.height);
        (y * self.width + x) as u32
    }
}

impl Surface for SnapshotSurface<'_> {
    fn dims(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn height(&self, x: i32, y: i32) -> Option<f64> {
        self.heights.get(self.index(x, y) as usize).copied()
    }

    fn deposit(&mut self, x: i32, y: i32, delta: f64) {
        let idx = self.index(x, y);
        self.deltas.push((idx, delta));
    }

    fn add_moisture(&mut self, x: i32, y: i32) {
        let idx = self.index(x, y);
        self.moisture.push(idx);
    }
}

/// Radial brush with linear falloff, weights normalized to sum to 1 so a
/// brushed erosion of `amount` removes exactly `amount` of height.
fn radial_brush(radius: usize) -> Vec<(i32, i32, f64)> {
    let r = radius as i32;
    let r_sq = (r * r).max(1) as f64;
    let mut brush = Vec::new();
    let mut total = 0.0;
    for dy in -r..=r {
        for dx in -r..=r {
            let dist_sq = (dx * dx + dy * dy) as f64;
            if dist_sq <= r_sq {
                let weight = 1.0 - dist_sq / (r_sq + 1.0);
                brush.push((dx, dy, weight));
                total += weight;
            }
        }
    }
    for (_, _, w) in brush.iter_mut() {
        *w /= total;
    }
    brush
}

/// The 2x2 height quad under a continuous position: `([h00, h10, h01, h11],
/// fx, fy)`. `None` when any corner tile is unavailable.
fn quad<S: Surface>(surface: &S, x: f64, y: f64) -> Option<([f64; 4], f64, f64)> {
    let (w, h) = surface.dims();
    let (wf, hf) = (w as f64, h as f64);
    let x = ((x % wf) + wf) % wf;
    let y = ((y % hf) + hf) % hf;
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    Some((
        [
            surface.height(x0, y0)?,
            surface.height(x0 + 1, y0)?,
            surface.height(x0, y0 + 1)?,
            surface.height(x0 + 1, y0 + 1)?,
        ],
        x.fract(),
        y.fract(),
    ))
}

fn bilerp(q: &[f64; 4], fx: f64, fy: f64) -> f64 {
    let h0 = q[0] * (1.0 - fx) + q[1] * fx;
    let h1 = q[2] * (1.0 - fx) + q[3] * fx;
    h0 * (1.0 - fy) + h1 * fy
}

/// Gradient of the bilinear patch, pointing uphill.
fn gradient(q: &[f64; 4], fx: f64, fy: f64) -> (f64, f64) {
    let gx = (q[1] - q[0]) * (1.0 - fy) + (q[3] - q[2]) * fy;
    let gy = (q[2] - q[0]) * (1.0 - fx) + (q[3] - q[1]) * fx;
    (gx, gy)
}

/// Splat a deposit across the 4 tiles nearest a continuous position.
/// Weights sum to 1.
fn splat<S: Surface>(surface: &mut S, x: f64, y: f64, amount: f64) {
    let (w, h) = surface.dims();
    let (wf, hf) = (w as f64, h as f64);
    let x = ((x % wf) + wf) % wf;
    let y = ((y % hf) + hf) % hf;
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let (fx, fy) = (x.fract(), y.fract());

    surface.deposit(x0, y0, amount * (1.0 - fx) * (1.0 - fy));
    surface.deposit(x0 + 1, y0, amount * fx * (1.0 - fy));
    surface.deposit(x0, y0 + 1, amount * (1.0 - fx) * fy);
    surface.deposit(x0 + 1, y0 + 1, amount * fx * fy);
}

/// Erode through the radial brush centered on the tile under a position.
fn brush_erode<S: Surface>(
    surface: &mut S,
    brush: &[(i32, i32, f64)],
    x: f64,
    y: f64,
    amount: f64,
) {
    let cx = x.floor() as i32;
    let cy = y.floor() as i32;
    for &(dx, dy, weight) in brush {
        surface.deposit(cx + dx, cy + dy, -amount * weight);
    }
}

/// Run one particle to completion. Returns (eroded, deposited, steps).
fn walk_particle<S: Surface>(
    surface: &mut S,
    rng: &mut ChaCha8Rng,
    params: &ErosionParams,
    brush: &[(i32, i32, f64)],
    start_x: f64,
    start_y: f64,
) -> (f64, f64, u64) {
    let (w, h) = surface.dims();
    let (wf, hf) = (w as f64, h as f64);
    let stop_height = params.stop_height();

    let mut x = start_x;
    let mut y = start_y;
    let mut dir_x = 0.0;
    let mut dir_y = 0.0;
    let mut velocity = params.initial_velocity;
    let mut water = params.initial_water;
    let mut sediment = 0.0f64;
    let mut eroded = 0.0f64;
    let mut deposited = 0.0f64;
    let mut steps = 0u64;

    for _ in 0..params.max_steps {
        let Some((q, fx, fy)) = quad(surface, x, y) else {
            break;
        };
        let old_height = bilerp(&q, fx, fy);

        // Below the sea-level cutoff further work is physically meaningless.
        if old_height < stop_height {
            break;
        }

        steps += 1;
        if params.gather_moisture {
            surface.add_moisture(x.floor() as i32, y.floor() as i32);
        }

        // Low-pass filter the direction against the downhill gradient.
        let (gx, gy) = gradient(&q, fx, fy);
        dir_x = dir_x * params.inertia - gx * (1.0 - params.inertia);
        dir_y = dir_y * params.inertia - gy * (1.0 - params.inertia);
        let len = (dir_x * dir_x + dir_y * dir_y).sqrt();
        if len > 1e-9 {
            dir_x /= len;
            dir_y /= len;
        } else {
            // Flat quad or local minimum: wander.
            let angle = rng.gen_range(0.0..TAU);
            dir_x = angle.cos();
            dir_y = angle.sin();
        }

        let old_x = x;
        let old_y = y;
        x = (((x + dir_x) % wf) + wf) % wf;
        y = (((y + dir_y) % hf) + hf) % hf;

        let Some(new_height) = quad(surface, x, y).map(|(q, fx, fy)| bilerp(&q, fx, fy)) else {
            break;
        };
        let delta = new_height - old_height;

        if delta > 0.0 {
            // Moving uphill is disallowed: drop what fits in the gap, stop.
            let amount = sediment.min(delta);
            if amount > 0.0 {
                splat(surface, old_x, old_y, amount);
                deposited += amount;
            }
            break;
        }

        let slope = -delta;
        let capacity = slope.max(params.min_slope) * velocity * water * params.capacity_factor;

        if sediment > capacity {
            let amount = (sediment - capacity) * params.deposit_rate;
            sediment -= amount;
            splat(surface, old_x, old_y, amount);
            deposited += amount;
        } else {
            // Never dig deeper than the downhill gap; that would turn a
            // slope into a pit in one step.
            let amount = ((capacity - sediment) * params.erosion_rate).min(slope);
            if amount > 0.0 {
                sediment += amount;
                brush_erode(surface, brush, old_x, old_y, amount);
                eroded += amount;
            }
        }

        velocity = (velocity * velocity - delta * params.gravity)
            .max(0.0)
            .sqrt()
            .min(params.max_velocity);
        water *= 1.0 - params.evaporation;

        if water < params.min_water {
            if sediment > 0.0 {
                splat(surface, x, y, sediment);
                deposited += sediment;
            }
            break;
        }
    }

    (eroded, deposited, steps)
}

/// One planned particle: the region window it spawns in and its sequence
/// number (which derives its private seed).
#[derive(Clone, Copy)]
struct Spawn {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    seq: u64,
}

impl Spawn {
    fn position(&self, rng: &mut ChaCha8Rng) -> (f64, f64) {
        (
            rng.gen_range(self.x0 as f64..self.x1 as f64),
            rng.gen_range(self.y0 as f64..self.y1 as f64),
        )
    }
}

fn particle_rng(seed: u64, seq: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(1 + seq))
}

/// Plan the spawn list: regions of the rect in shuffled order, each with a
/// particle budget of `coverage * area`, the fraction resolved by one
/// Bernoulli trial.
fn plan_spawns(
    grid: &TileGrid,
    rect: &TileRect,
    coverage_per_tile: f64,
    seed: u64,
) -> Vec<Spawn> {
    let mut order = grid.region_indices_in(rect);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    // Shuffled so memory-locality effects never bias the simulation.
    order.shuffle(&mut rng);

    let mut spawns = Vec::new();
    let mut seq = 0u64;
    for idx in order {
        let (ox, oy) = grid.regions()[idx].origin();
        let x0 = rect.x.max(ox);
        let y0 = rect.y.max(oy);
        let x1 = rect.right().min(ox + REGION_SIZE as i32);
        let y1 = rect.bottom().min(oy + REGION_SIZE as i32);
        let area = ((x1 - x0) as f64) * ((y1 - y0) as f64);

        let expected = coverage_per_tile * area;
        let mut budget = expected.floor() as u64;
        if rng.gen::<f64>() < expected.fract() {
            budget += 1;
        }
        for _ in 0..budget {
            spawns.push(Spawn { x0, y0, x1, y1, seq });
            seq += 1;
        }
    }
    spawns
}

/// Drop `coverage_per_tile * area` particles over the rect and run each walk.
///
/// `opts.threads == 1` walks particles sequentially against the live grid;
/// more threads run the batched snapshot scheme. Either way a fixed seed
/// reproduces the run exactly.
pub fn drop_particles(
    grid: &mut TileGrid,
    rect: TileRect,
    coverage_per_tile: f64,
    opts: ScanOptions,
    params: &ErosionParams,
    seed: u64,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<ErosionStats, WorldError> {
    rect.validate(grid)?;

    let mut stats = ErosionStats::default();
    if coverage_per_tile <= 0.0 {
        return Ok(stats);
    }

    let spawns = plan_spawns(grid, &rect, coverage_per_tile, seed);
    let total = spawns.len();
    stats.particles = total as u64;
    if total == 0 {
        return Ok(stats);
    }

    let brush = radial_brush(params.brush_radius);
    let start = Instant::now();
    let mut report = |done: usize| -> bool {
        match progress.as_mut() {
            Some(cb) => cb(ScanProgress {
                fraction: done as f64 / total as f64,
                elapsed: start.elapsed(),
            }),
            None => true,
        }
    };

    if opts.threads <= 1 {
        let mut surface = GridSurface { grid };
        for (done, spawn) in spawns.iter().enumerate() {
            let mut rng = particle_rng(seed, spawn.seq);
            let (sx, sy) = spawn.position(&mut rng);
            let (er, dep, steps) = walk_particle(&mut surface, &mut rng, params, &brush, sx, sy);
            stats.total_eroded += er;
            stats.total_deposited += dep;
            stats.steps += steps;

            if done % 1024 == 0 && !report(done) {
                return Err(WorldError::Cancelled);
            }
        }
        report(total);
        return Ok(stats);
    }

    let width = grid.width();
    let height = grid.height();
    let mut done = 0usize;

    for batch in spawns.chunks(BATCH) {
        // Snapshot the height field once per batch; every particle in the
        // batch walks the same static terrain.
        let mut snapshot = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                snapshot.push(grid.tile(x, y).height);
            }
        }

        let results: Vec<_> = batch
            .par_iter()
            .map(|spawn| {
                let mut rng = particle_rng(seed, spawn.seq);
                let (sx, sy) = spawn.position(&mut rng);
                let mut surface = SnapshotSurface::new(&snapshot, width, height);
                let (er, dep, steps) =
                    walk_particle(&mut surface, &mut rng, params, &brush, sx, sy);
                (surface.deltas, surface.moisture, er, dep, steps)
            })
            .collect();

        // Merge in particle order so the outcome is schedule-independent.
        for (deltas, moisture, er, dep, steps) in results {
            for (idx, delta) in deltas {
                let x = idx as i32 % width;
                let y = idx as i32 / width;
                grid.tile_mut(x, y).height += delta;
            }
            if params.gather_moisture {
                for idx in moisture {
                    let x = idx as i32 % width;
                    let y = idx as i32 / width;
                    grid.tile_mut(x, y).moisture += 1.0;
                }
            }
            stats.total_eroded += er;
            stats.total_deposited += dep;
            stats.steps += steps;
        }

        done += batch.len();
        if !report(done) {
            return Err(WorldError::Cancelled);
        }
    }

    Ok(stats)
}
