//! Seeded fractal noise fields that tile seamlessly over the grid.
//!
//! A field stacks octaves of smooth gradient noise, each octave half the
//! amplitude and twice the frequency of the previous. Seamless wrap on both
//! axes comes from sampling 4-D Perlin noise on the torus embedding: each
//! grid axis maps to a circle, and every octave completes a whole number of
//! cycles per period, so `eval(x + period_x, y) == eval(x, y)` exactly.

use noise::{NoiseFn, Perlin};
use std::f64::consts::TAU;

use crate::error::WorldError;

/// A deterministic continuous scalar field over the torus.
pub struct NoiseField {
    octaves: u32,
    cycles: u32,
    period_x: f64,
    period_y: f64,
    sources: Vec<Perlin>,
}

impl NoiseField {
    /// Build a field with `octaves > 0` layers; the lowest octave completes
    /// `cycles >= 1` whole cycles across each period.
    pub fn new(
        seed: u32,
        octaves: u32,
        cycles: u32,
        period_x: f64,
        period_y: f64,
    ) -> Result<Self, WorldError> {
        if octaves == 0 {
            return Err(WorldError::InvalidNoise("octave count must be positive"));
        }
        if cycles == 0 {
            return Err(WorldError::InvalidNoise("cycle count must be positive"));
        }
        if period_x <= 0.0 || period_y <= 0.0 {
            return Err(WorldError::InvalidNoise("periods must be positive"));
        }

        // One generator per octave so octaves decorrelate.
        let sources = (0..octaves)
            .map(|o| Perlin::new(seed.wrapping_add(o.wrapping_mul(7919))))
            .collect();

        Ok(Self {
            octaves,
            cycles,
            period_x,
            period_y,
            sources,
        })
    }

    /// Sample the field at a tile position. Result is in `[-1, 1]`.
    ///
    /// Octaves are summed from the smallest amplitude up to limit
    /// floating-point cancellation.
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let tx = TAU * (x / self.period_x);
        let ty = TAU * (y / self.period_y);
        let (sx, cx) = tx.sin_cos();
        let (sy, cy) = ty.sin_cos();

        let mut sum = 0.0;
        let mut amplitude_sum = 0.0;
        for o in (0..self.octaves).rev() {
            let amplitude = 0.5f64.powi(o as i32);
            // Whole cycles per period; circle radius puts that many noise
            // units on the circumference.
            let freq = (self.cycles as f64) * f64::from(1u32 << o.min(30));
            let r = freq / TAU;
            sum += amplitude * self.sources[o as usize].get([r * cx, r * sx, r * cy, r * sy]);
            amplitude_sum += amplitude;
        }

        (sum / amplitude_sum).clamp(-1.0, 1.0)
    }
}
