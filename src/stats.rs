//! Whole-grid field statistics.
//!
//! Min/max ranges are only valid right after a [`GlobalStats::refresh_ranges`]
//! pass; every stage that reshapes a field (erosion in particular) leaves
//! them stale until explicitly recomputed. The derived levels (sea, alpine,
//! forest) are written by the calibration stage.

use std::sync::Mutex;

use crate::error::WorldError;
use crate::grid::{TileGrid, TileRect};
use crate::scan::{self, ScanOptions, MAX_WORKERS};

#[derive(Clone, Copy, Debug)]
pub struct GlobalStats {
    pub min_height: f64,
    pub max_height: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_moisture: f64,
    pub max_moisture: f64,
    /// Height below which a tile counts as water.
    pub sea_level: f64,
    /// Height above which a tile counts as alpine.
    pub alpine_level: f64,
    /// Forest-density threshold above which a tile is forested.
    pub forest_level: f64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            min_height: 0.0,
            max_height: 0.0,
            min_temperature: 0.0,
            max_temperature: 0.0,
            min_moisture: 0.0,
            max_moisture: 0.0,
            sea_level: 0.0,
            alpine_level: 0.0,
            forest_level: 0.0,
        }
    }
}

#[derive(Clone, Copy)]
struct Extremes {
    min_h: f64,
    max_h: f64,
    min_t: f64,
    max_t: f64,
    min_m: f64,
    max_m: f64,
}

impl Extremes {
    fn new() -> Self {
        Self {
            min_h: f64::INFINITY,
            max_h: f64::NEG_INFINITY,
            min_t: f64::INFINITY,
            max_t: f64::NEG_INFINITY,
            min_m: f64::INFINITY,
            max_m: f64::NEG_INFINITY,
        }
    }
}

impl GlobalStats {
    /// Recompute the min/max ranges with one parallel reduction pass. The
    /// derived levels are left untouched.
    pub fn refresh_ranges(
        &mut self,
        grid: &TileGrid,
        rect: TileRect,
        opts: ScanOptions,
    ) -> Result<(), WorldError> {
        // One slot per worker; disjoint ownership means every lock is
        // uncontended.
        let partials: Vec<Mutex<Extremes>> =
            (0..MAX_WORKERS).map(|_| Mutex::new(Extremes::new())).collect();

        let visitor = |worker: usize, grid: &TileGrid, x: i32, y: i32| {
            let tile = grid.tile(x, y);
            let mut p = partials[worker].lock().unwrap();
            p.min_h = p.min_h.min(tile.height);
            p.max_h = p.max_h.max(tile.height);
            p.min_t = p.min_t.min(tile.temperature);
            p.max_t = p.max_t.max(tile.temperature);
            p.min_m = p.min_m.min(tile.moisture);
            p.max_m = p.max_m.max(tile.moisture);
        };
        scan::for_each_tile_ref(grid, rect, opts, &[&visitor], None)?;

        let mut merged = Extremes::new();
        for slot in &partials {
            let p = slot.lock().unwrap();
            merged.min_h = merged.min_h.min(p.min_h);
            merged.max_h = merged.max_h.max(p.max_h);
            merged.min_t = merged.min_t.min(p.min_t);
            merged.max_t = merged.max_t.max(p.max_t);
            merged.min_m = merged.min_m.min(p.min_m);
            merged.max_m = merged.max_m.max(p.max_m);
        }

        self.min_height = merged.min_h;
        self.max_height = merged.max_h;
        self.min_temperature = merged.min_t;
        self.max_temperature = merged.max_t;
        self.min_moisture = merged.min_m;
        self.max_moisture = merged.max_m;
        Ok(())
    }
}
