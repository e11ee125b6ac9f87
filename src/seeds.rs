//! Seed management for world generation.
//!
//! Each generation system gets its own seed, derived from a master seed, so
//! one aspect of a world can be varied while the others stay fixed. The same
//! master seed always reproduces the same world.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Seeds for the generation systems.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldSeeds {
    /// Master seed, kept for display and reproduction.
    pub master: u64,
    /// Noise field synthesis (height, temperature, forest density).
    pub fields: u64,
    /// Hydraulic erosion particle placement and walks.
    pub erosion: u64,
    /// Settlement and road layout.
    pub settlements: u64,
}

impl WorldSeeds {
    /// Derive all sub-seeds deterministically from a master seed.
    pub fn from_master(master: u64) -> Self {
        Self {
            master,
            fields: derive_seed(master, "fields"),
            erosion: derive_seed(master, "erosion"),
            settlements: derive_seed(master, "settlements"),
        }
    }
}

/// Derive a sub-seed from the master seed and a system name.
fn derive_seed(master: u64, system: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    master.hash(&mut hasher);
    system.hash(&mut hasher);
    hasher.finish()
}

impl std::fmt::Display for WorldSeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WorldSeeds {{ master: {}, fields: {}, erosion: {}, settlements: {} }}",
            self.master, self.fields, self.erosion, self.settlements,
        )
    }
}
