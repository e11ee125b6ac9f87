//! The full generation pipeline.
//!
//! Phase order: noise field synthesis, range reduction, threshold
//! calibration (sea, alpine and forest levels in one shared pass-set),
//! hydraulic erosion with moisture gathering, range and level refresh, base
//! texture layering, contour tracing, landmass identification, settlements.
//! Every whole-grid step runs through the scan module; the caller's progress
//! callback sees phase-weighted overall fractions and can cancel at any
//! checkpoint.

use std::time::{Duration, Instant};

use crate::calibrate::{self, Calibration, SampleFn};
use crate::erosion::{self, ErosionParams};
use crate::error::WorldError;
use crate::grid::{TileGrid, TileRect};
use crate::landmass::{self, Landmass};
use crate::noise_field::NoiseField;
use crate::scan::{self, ScanOptions, ScanOutcome, ScanProgress};
use crate::seeds::WorldSeeds;
use crate::settlement::{self, SettlementParams, SettlementTextures};
use crate::stats::GlobalStats;
use crate::tile::{TextureId, Tile};
use crate::trace;

/// Base terrain texture palette; ids are opaque to the core.
#[derive(Clone, Debug)]
pub struct TerrainTextures {
    pub water: TextureId,
    pub sand: TextureId,
    pub grass: TextureId,
    pub rock: TextureId,
    pub snow: TextureId,
    pub forest: TextureId,
}

impl Default for TerrainTextures {
    fn default() -> Self {
        Self {
            water: TextureId(1),
            sand: TextureId(2),
            grass: TextureId(3),
            rock: TextureId(4),
            snow: TextureId(5),
            forest: TextureId(6),
        }
    }
}

/// Everything the pipeline needs to know, JSON round-trippable for the CLI.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationParams {
    pub regions_x: usize,
    pub regions_y: usize,
    pub threads: usize,

    pub height_octaves: u32,
    pub height_cycles: u32,
    /// Scale applied to the unit-range height noise.
    pub height_amplitude: f64,

    pub temperature_octaves: u32,
    pub temperature_cycles: u32,
    pub base_temperature: f64,
    pub temperature_range: f64,

    pub forest_octaves: u32,
    pub forest_cycles: u32,

    /// Fraction of tiles below sea level.
    pub ocean_fraction: f64,
    /// Fraction of tiles below the alpine line.
    pub alpine_fraction: f64,
    /// Fraction of tiles below the forest-density threshold.
    pub forest_fraction: f64,
    pub calibration_epsilon: f64,
    pub calibration_buckets: usize,

    /// Erosion particles per tile.
    pub erosion_coverage: f64,
    pub erosion: ErosionParams,

    pub contour_levels: usize,

    pub total_population: u32,
    pub settlement: SettlementParams,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            regions_x: 8,
            regions_y: 8,
            threads: ScanOptions::default().threads,
            height_octaves: 6,
            height_cycles: 3,
            height_amplitude: 60.0,
            temperature_octaves: 4,
            temperature_cycles: 2,
            base_temperature: 12.0,
            temperature_range: 18.0,
            forest_octaves: 4,
            forest_cycles: 4,
            ocean_fraction: 0.4,
            alpine_fraction: 0.92,
            forest_fraction: 0.55,
            calibration_epsilon: 0.05,
            calibration_buckets: 64,
            erosion_coverage: 0.5,
            erosion: ErosionParams::default(),
            contour_levels: 4,
            total_population: 4000,
            settlement: SettlementParams::default(),
        }
    }
}

/// A finished world.
pub struct World {
    pub grid: TileGrid,
    pub stats: GlobalStats,
    pub landmasses: Vec<Landmass>,
    pub settlements: u32,
    pub seeds: WorldSeeds,
    pub terrain: TerrainTextures,
    pub settlement_textures: SettlementTextures,
}

/// Overall progress callback: `(fraction, elapsed) -> continue?`.
pub type GenProgressFn<'a> = &'a mut dyn FnMut(f64, Duration) -> bool;

// Phase weights, tuned to rough wall-clock shares. They must sum to 1.
const W_SYNTH: f64 = 0.20;
const W_RANGES: f64 = 0.04;
const W_CALIBRATE: f64 = 0.12;
const W_EROSION: f64 = 0.36;
const W_REFRESH: f64 = 0.08;
const W_LAYERS: f64 = 0.06;
const W_CONTOURS: f64 = 0.05;
const W_LANDMASS: f64 = 0.06;
const W_SETTLE: f64 = 0.03;

struct Phases<'a, 'b> {
    progress: Option<&'a mut GenProgressFn<'b>>,
    start: Instant,
    base: f64,
}

impl Phases<'_, '_> {
    /// Checkpoint between passes; advances the base fraction.
    fn advance(&mut self, weight: f64) -> Result<(), WorldError> {
        self.base += weight;
        let frac = self.base;
        if let Some(p) = self.progress.as_mut() {
            if !p(frac, self.start.elapsed()) {
                return Err(WorldError::Cancelled);
            }
        }
        Ok(())
    }

    /// Whether a progress callback was supplied for this run.
    fn has_progress(&self) -> bool {
        self.progress.is_some()
    }

    /// Sub-callback for a pass covering `weight` of the whole run. Only
    /// call when [`has_progress`](Self::has_progress) is `true`.
    fn sub(&mut self, weight: f64) -> Box<dyn FnMut(ScanProgress) -> bool + '_> {
        let base = self.base;
        let start = self.start;
        let p = self.progress.as_mut().expect("has_progress checked by caller");
        Box::new(move |sp: ScanProgress| p(base + weight * sp.fraction, start.elapsed()))
    }

    fn check_outcome(outcome: ScanOutcome) -> Result<(), WorldError> {
        match outcome {
            ScanOutcome::Completed => Ok(()),
            ScanOutcome::Cancelled => Err(WorldError::Cancelled),
        }
    }
}

/// Generate a complete world.
pub fn generate(
    params: &GenerationParams,
    master_seed: u64,
    mut progress: Option<GenProgressFn<'_>>,
) -> Result<World, WorldError> {
    let seeds = WorldSeeds::from_master(master_seed);
    let mut grid = TileGrid::new(params.regions_x, params.regions_y)?;
    let rect = TileRect::full(&grid);
    let opts = ScanOptions::with_threads(params.threads);

    let mut phases = Phases {
        progress: progress.as_mut(),
        start: Instant::now(),
        base: 0.0,
    };

    let width = grid.width() as f64;
    let height = grid.height() as f64;
    let noise_seed = seeds.fields as u32;
    let height_noise = NoiseField::new(
        noise_seed,
        params.height_octaves,
        params.height_cycles,
        width,
        height,
    )?;
    let temperature_noise = NoiseField::new(
        noise_seed.wrapping_add(1111),
        params.temperature_octaves,
        params.temperature_cycles,
        width,
        height,
    )?;
    let forest_noise = NoiseField::new(
        noise_seed.wrapping_add(2222),
        params.forest_octaves,
        params.forest_cycles,
        width,
        height,
    )?;

    // Field synthesis: one pass, both scalar fields.
    {
        let synth = |_w: usize, tile: &mut Tile, x: i32, y: i32| {
            tile.height = height_noise.eval(x as f64, y as f64) * params.height_amplitude;
            tile.temperature = params.base_temperature
                + temperature_noise.eval(x as f64, y as f64) * params.temperature_range;
            tile.moisture = 0.0;
            tile.landmass = 0;
            tile.scratch = 0.0;
            tile.clear_layers();
        };
        if phases.has_progress() {
            let mut sub = phases.sub(W_SYNTH);
            Phases::check_outcome(scan::for_each_tile(
                &mut grid,
                rect,
                opts,
                &[&synth],
                Some(sub.as_mut()),
            )?)?;
        } else {
            Phases::check_outcome(scan::for_each_tile(&mut grid, rect, opts, &[&synth], None)?)?;
        }
    }
    phases.advance(W_SYNTH)?;

    let mut stats = GlobalStats::default();
    stats.refresh_ranges(&grid, rect, opts)?;
    phases.advance(W_RANGES)?;

    // Calibrate sea, alpine and forest levels against target coverages,
    // sharing the tally passes.
    let height_sample: SampleFn<'_> = &|g: &TileGrid, x: i32, y: i32| g.tile(x, y).height;
    let forest_sample: SampleFn<'_> =
        &|_g: &TileGrid, x: i32, y: i32| forest_noise.eval(x as f64, y as f64);
    {
        let mut cals = [
            Calibration::new(
                height_sample,
                params.ocean_fraction,
                params.calibration_epsilon,
                stats.min_height,
                stats.max_height,
            )?,
            Calibration::new(
                height_sample,
                params.alpine_fraction,
                params.calibration_epsilon,
                stats.min_height,
                stats.max_height,
            )?,
            Calibration::new(
                forest_sample,
                params.forest_fraction,
                params.calibration_epsilon,
                -1.0,
                1.0,
            )?,
        ];
        let values =
            calibrate::calibrate(&grid, rect, opts, &mut cals, params.calibration_buckets)?;
        stats.sea_level = values[0];
        stats.alpine_level = values[1];
        stats.forest_level = values[2];
    }
    phases.advance(W_CALIBRATE)?;

    // Erosion reshapes heights and gathers moisture.
    {
        let erosion_params = ErosionParams {
            sea_level: stats.sea_level,
            ..params.erosion.clone()
        };
        if phases.has_progress() {
            let mut sub = phases.sub(W_EROSION);
            erosion::drop_particles(
                &mut grid,
                rect,
                params.erosion_coverage,
                opts,
                &erosion_params,
                seeds.erosion,
                Some(sub.as_mut()),
            )?;
        } else {
            erosion::drop_particles(
                &mut grid,
                rect,
                params.erosion_coverage,
                opts,
                &erosion_params,
                seeds.erosion,
                None,
            )?;
        }
    }
    phases.advance(W_EROSION)?;

    // Heights moved: ranges and height-derived levels are stale.
    stats.refresh_ranges(&grid, rect, opts)?;
    {
        let mut cals = [
            Calibration::new(
                height_sample,
                params.ocean_fraction,
                params.calibration_epsilon,
                stats.min_height,
                stats.max_height,
            )?,
            Calibration::new(
                height_sample,
                params.alpine_fraction,
                params.calibration_epsilon,
                stats.min_height,
                stats.max_height,
            )?,
        ];
        let values =
            calibrate::calibrate(&grid, rect, opts, &mut cals, params.calibration_buckets)?;
        stats.sea_level = values[0];
        stats.alpine_level = values[1];
    }
    phases.advance(W_REFRESH)?;

    // Base texture layers from the calibrated levels.
    let terrain = TerrainTextures::default();
    {
        let beach = (stats.alpine_level - stats.sea_level) * 0.04;
        let sea_level = stats.sea_level;
        let alpine_level = stats.alpine_level;
        let forest_level = stats.forest_level;
        let base_temperature = params.base_temperature;
        let tex = terrain.clone();
        let forest_noise = &forest_noise;
        let layer = move |_w: usize, tile: &mut Tile, x: i32, y: i32| {
            tile.clear_layers();
            let base = if tile.height <= sea_level {
                tex.water
            } else if tile.height <= sea_level + beach {
                tex.sand
            } else if tile.height >= alpine_level {
                if tile.temperature < base_temperature {
                    tex.snow
                } else {
                    tex.rock
                }
            } else {
                tex.grass
            };
            tile.push_layer(base);
            if base == tex.grass && forest_noise.eval(x as f64, y as f64) >= forest_level {
                tile.push_layer(tex.forest);
            }
        };
        let mut sub = phases.sub(W_LAYERS);
        let cb = match sub.as_mut() {
            Some(b) => Some(b.as_mut()),
            None => None,
        };
        Phases::check_outcome(scan::for_each_tile(&mut grid, rect, opts, &[&layer], cb)?)?;
    }
    phases.advance(W_LAYERS)?;

    trace::trace_contours(
        &mut grid,
        rect,
        params.contour_levels,
        stats.sea_level,
        stats.max_height,
    )?;
    phases.advance(W_CONTOURS)?;

    let landmasses = landmass::identify_landmasses(&mut grid, rect, stats.sea_level, opts)?;
    phases.advance(W_LANDMASS)?;

    // Settlements go on clear grassland only.
    let settlement_textures = SettlementTextures::default();
    let settlements = {
        let grass = terrain.grass;
        let suitable = move |g: &TileGrid, r: TileRect| {
            for y in r.y..r.bottom() {
                for x in r.x..r.right() {
                    if g.tile(x, y).top_layer() != Some(grass) {
                        return false;
                    }
                }
            }
            true
        };
        settlement::add_settlements(
            &mut grid,
            rect,
            params.total_population,
            seeds.settlements,
            &params.settlement,
            &settlement_textures,
            &suitable,
        )?
    };
    phases.advance(W_SETTLE)?;

    Ok(World {
        grid,
        stats,
        landmasses,
        settlements,
        seeds,
        terrain,
        settlement_textures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill;
    use crate::tile::TileFlags;

    fn small_params() -> GenerationParams {
        GenerationParams {
            regions_x: 2,
            regions_y: 2,
            threads: 2,
            erosion_coverage: 0.05,
            total_population: 600,
            ..GenerationParams::default()
        }
    }

    #[test]
    fn test_pipeline_completes_and_stats_bracket_fields() {
        let world = generate(&small_params(), 1, None).unwrap();
        let grid = &world.grid;
        let stats = &world.stats;

        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let t = grid.tile(x, y);
                assert!(stats.min_height <= t.height && t.height <= stats.max_height);
                assert!(t.top_layer().is_some(), "bare tile at {x},{y}");
                assert_ne!(t.landmass, 0, "unassigned landmass at {x},{y}");
            }
        }
        assert!(stats.sea_level < stats.alpine_level);
        assert!(!world.landmasses.is_empty());
    }

    #[test]
    fn test_same_seed_same_world() {
        let digest = |world: &World| {
            let grid = &world.grid;
            let mut heights = 0.0f64;
            let mut ids: Vec<u16> = Vec::new();
            for y in 0..grid.height() {
                for x in 0..grid.width() {
                    heights += grid.tile(x, y).height * ((x + y * 7) as f64);
                    ids.push(grid.tile(x, y).landmass);
                }
            }
            (heights, ids, world.settlements)
        };
        let a = generate(&small_params(), 42, None).unwrap();
        let b = generate(&small_params(), 42, None).unwrap();
        assert_eq!(digest(&a), digest(&b));

        let c = generate(&small_params(), 43, None).unwrap();
        assert_ne!(digest(&a).0, digest(&c).0);
    }

    #[test]
    fn test_progress_monotonic_and_complete() {
        let mut fractions: Vec<f64> = Vec::new();
        let mut cb = |f: f64, _e: std::time::Duration| {
            fractions.push(f);
            true
        };
        generate(&small_params(), 3, Some(&mut cb)).unwrap();

        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|w| w[1] >= w[0] - 1e-9));
        assert!((fractions.last().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancellation_aborts_early() {
        let mut cb = |_f: f64, _e: std::time::Duration| false;
        let err = generate(&small_params(), 3, Some(&mut cb)).unwrap_err();
        assert_eq!(err, WorldError::Cancelled);
    }

    #[test]
    fn test_params_json_roundtrip() {
        let params = small_params();
        let json = serde_json::to_string(&params).unwrap();
        let back: GenerationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }

    #[test]
    fn test_uniform_inside_predicate_end_to_end() {
        // 256x256, all-inside: no boundary anywhere, one group, id 0.
        let mut grid = TileGrid::new(8, 8).unwrap();
        let inside = |_: &TileGrid, _: i32, _: i32| true;
        let boundary_tiles = trace::trace_boundaries(
            &mut grid,
            TileRect::full(&grid),
            &inside,
            &mut |_g, _x, _y| {},
        )
        .unwrap();
        assert_eq!(boundary_tiles, 0);

        let is_boundary = |g: &TileGrid, x: i32, y: i32| {
            g.tile(x, y).flags.contains(TileFlags::BORDER)
        };
        let mut max_group = 0;
        let mut filled = 0u64;
        let groups = fill::fill_groups(
            &mut grid,
            TileRect::full(&grid),
            &is_boundary,
            &mut |_g, _x, _y, id| {
                max_group = max_group.max(id);
                filled += 1;
            },
        )
        .unwrap();

        assert_eq!(groups, 1);
        assert_eq!(max_group, 0);
        assert_eq!(filled, 256 * 256);
    }
}
