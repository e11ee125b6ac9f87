//! Error types for the generation core.
//!
//! Degenerate inputs are reported as typed errors instead of debug asserts.
//! Algorithmic soft failures (calibration that runs out of narrowing room,
//! settlement placement that exhausts its retry budget) are not errors; they
//! surface as best-effort results or `false` returns.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// A tile range with zero area was passed to a grid pass.
    #[error("tile range has zero area")]
    EmptyRange,

    /// A tile range extends outside the grid.
    #[error("tile range {x},{y} {width}x{height} lies outside the grid")]
    InvalidBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },

    /// Noise field constructed with zero octaves, zero cycles, or a
    /// non-positive period.
    #[error("invalid noise field parameters: {0}")]
    InvalidNoise(&'static str),

    /// Calibration constructed with an inverted value range, a target
    /// fraction outside (0, 1), or a non-positive epsilon.
    #[error("invalid calibration parameters: {0}")]
    InvalidCalibration(&'static str),

    /// Requested grid dimensions exceed the supported maximum.
    #[error("grid of {regions_x}x{regions_y} regions is too large")]
    GridTooLarge { regions_x: usize, regions_y: usize },

    /// Flood fill produced more connected components than landmass ids
    /// can address.
    #[error("more than {0} landmasses")]
    TooManyLandmasses(u16),

    /// A progress callback requested cancellation; the pass tore down its
    /// workers and aborted.
    #[error("generation cancelled by progress callback")]
    Cancelled,
}
