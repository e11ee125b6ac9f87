//! Procedural overworld generation.
//!
//! Synthesizes a large torus-wrapped tile grid and derives geographic
//! structure from it: noise-seeded height and climate fields, hydraulic
//! erosion, calibrated sea/alpine/forest levels, contour lines, landmasses,
//! and settlements with road networks.

pub mod ascii;
pub mod calibrate;
pub mod erosion;
pub mod error;
pub mod fill;
pub mod grid;
pub mod landmass;
pub mod noise_field;
pub mod scan;
pub mod seeds;
pub mod settlement;
pub mod stats;
pub mod tile;
pub mod trace;
pub mod worldgen;
