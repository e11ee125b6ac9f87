//! Particle-based hydraulic erosion.
//!
//! Simulated water particles are dropped across the grid, flow downhill over
//! bilinearly interpolated heights, erode sediment on steep fast stretches
//! and deposit it where the flow slows, reshaping the height field in place.
//! With moisture gathering enabled each particle also waters every tile it
//! crosses, which later feeds the moisture-driven texture layers.
//!
//! Every height mutation goes through a signed-delta deposit helper with
//! normalized splat weights, so the total height change of a run equals the
//! sum of its per-step deltas exactly (see the mass bookkeeping test).

mod particles;

pub use particles::drop_particles;

/// Tuning parameters for the particle simulation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErosionParams {
    /// Momentum conservation factor (0.0-1.0). Higher values keep particles
    /// moving in straighter lines, carving longer channels.
    pub inertia: f64,

    /// Sediment capacity multiplier; capacity = slope * velocity * water *
    /// this factor.
    pub capacity_factor: f64,

    /// Slope floor used in the capacity formula so flat stretches still
    /// carry a little sediment.
    pub min_slope: f64,

    /// Fraction of spare capacity eroded per step.
    pub erosion_rate: f64,

    /// Fraction of excess sediment deposited per step.
    pub deposit_rate: f64,

    /// Multiplicative water loss per step.
    pub evaporation: f64,

    /// Water volume below which a particle dies, dropping its sediment.
    pub min_water: f64,

    /// Maximum walk length in steps.
    pub max_steps: usize,

    /// Radius of the radial erosion brush, in tiles.
    pub brush_radius: usize,

    pub initial_water: f64,
    pub initial_velocity: f64,

    /// Gravity factor in the velocity update.
    pub gravity: f64,

    /// Velocity cap; keeps the capacity formula bounded on cliff faces.
    pub max_velocity: f64,

    /// Calibrated sea level; particles stop once they sink far enough
    /// below it.
    pub sea_level: f64,

    /// How far below sea level a particle may still work before it stops.
    /// Tunable on purpose: the cutoff is a physical fudge, not a constant.
    pub sea_level_margin: f64,

    /// Increment the moisture field of every tile a particle crosses.
    pub gather_moisture: bool,
}

impl Default for ErosionParams {
    fn default() -> Self {
        Self {
            inertia: 0.3,
            capacity_factor: 8.0,
            min_slope: 0.01,
            erosion_rate: 0.3,
            deposit_rate: 0.3,
            evaporation: 0.02,
            min_water: 0.01,
            max_steps: 96,
            brush_radius: 2,
            initial_water: 1.0,
            initial_velocity: 1.0,
            gravity: 4.0,
            max_velocity: 10.0,
            sea_level: 0.0,
            sea_level_margin: 2.0,
            gather_moisture: true,
        }
    }
}

impl ErosionParams {
    /// Subtle smoothing; good for previews.
    pub fn gentle() -> Self {
        Self {
            erosion_rate: 0.1,
            deposit_rate: 0.15,
            max_steps: 48,
            ..Self::default()
        }
    }

    /// Deep valleys and long channels.
    pub fn dramatic() -> Self {
        Self {
            inertia: 0.55,
            capacity_factor: 14.0,
            erosion_rate: 0.5,
            max_steps: 160,
            ..Self::default()
        }
    }

    /// Height below which a particle stops working.
    pub fn stop_height(&self) -> f64 {
        self.sea_level - self.sea_level_margin
    }
}

/// Bookkeeping for one erosion run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErosionStats {
    pub particles: u64,
    pub steps: u64,
    pub total_eroded: f64,
    pub total_deposited: f64,
}

impl ErosionStats {
    /// Net height added to the grid by this run.
    pub fn net_deposit(&self) -> f64 {
        self.total_deposited - self.total_eroded
    }
}
