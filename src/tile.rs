//! Per-tile data: scalar fields, texture layer stack, and the named flag set.
//!
//! Tiles are plain data owned by the grid; the generation passes mutate them
//! in place and never allocate or free individual tiles.

/// Number of texture layer slots per tile.
pub const TILE_LAYERS: usize = 4;

/// Opaque texture identifier. What a given id renders as is decided by the
/// presentation layer; the core only writes ids handed to it in palettes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureId(pub u16);

impl TextureId {
    /// Sentinel for an empty layer slot.
    pub const NONE: TextureId = TextureId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// Named per-tile flags.
///
/// Replaces a convention-owned raw bitset: every flag is named and owned by
/// exactly one pass, so two algorithms can never collide on a bit.
///
/// | flag                 | owner                                          |
/// |----------------------|------------------------------------------------|
/// | `TRACE_N..TRACE_W`   | boundary tracer, cleared at the start of each  |
/// |                      | whole-grid trace; one bit per travel direction |
/// | `BORDER`             | boundary tracer output, consumed by the filler |
/// | `CONTOUR`            | contour tracer output; saturates across levels |
/// | `FILLED`, `QUEUED`   | region filler, cleared per fill operation      |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileFlags(u16);

impl TileFlags {
    /// Walker left this tile heading north.
    pub const TRACE_N: TileFlags = TileFlags(1 << 0);
    /// Walker left this tile heading east.
    pub const TRACE_E: TileFlags = TileFlags(1 << 1);
    /// Walker left this tile heading south.
    pub const TRACE_S: TileFlags = TileFlags(1 << 2);
    /// Walker left this tile heading west.
    pub const TRACE_W: TileFlags = TileFlags(1 << 3);
    /// Tile sits on the inside edge of a traced boundary.
    pub const BORDER: TileFlags = TileFlags(1 << 4);
    /// Tile lies on an iso-height contour line.
    pub const CONTOUR: TileFlags = TileFlags(1 << 5);
    /// Tile was filled by the active flood-fill operation.
    pub const FILLED: TileFlags = TileFlags(1 << 6);
    /// Tile was queued as a flood-fill segment seed.
    pub const QUEUED: TileFlags = TileFlags(1 << 7);

    /// All four directional trace bits.
    pub const TRACE_ALL: TileFlags = TileFlags(0b1111);

    pub fn empty() -> Self {
        TileFlags(0)
    }

    pub fn contains(&self, other: TileFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: TileFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TileFlags) {
        self.0 &= !other.0;
    }
}

/// A single grid cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    /// Terrain height. Negative values are legal; the meaning of zero is
    /// whatever the calibrated sea level says it is.
    pub height: f64,
    pub temperature: f64,
    /// Accumulated by erosion particles when moisture gathering is on.
    pub moisture: f64,
    /// Landmass id; 0 means unassigned or boundary.
    pub landmass: u16,
    /// Fixed-width texture layer stack, bottom first. `TextureId::NONE`
    /// marks an empty slot.
    pub layers: [TextureId; TILE_LAYERS],
    pub flags: TileFlags,
    /// Owned transiently by whichever fill or settlement pass is active.
    /// Road painting records the road width here.
    pub scratch: f64,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            height: 0.0,
            temperature: 0.0,
            moisture: 0.0,
            landmass: 0,
            layers: [TextureId::NONE; TILE_LAYERS],
            flags: TileFlags::empty(),
            scratch: 0.0,
        }
    }
}

impl Tile {
    /// Place a texture into the first empty layer slot. When the stack is
    /// full the topmost slot is overwritten.
    pub fn push_layer(&mut self, id: TextureId) {
        for slot in self.layers.iter_mut() {
            if slot.is_none() {
                *slot = id;
                return;
            }
        }
        self.layers[TILE_LAYERS - 1] = id;
    }

    /// Topmost non-empty layer, if any.
    pub fn top_layer(&self) -> Option<TextureId> {
        self.layers.iter().rev().find(|id| !id.is_none()).copied()
    }

    pub fn has_layer(&self, id: TextureId) -> bool {
        self.layers.iter().any(|slot| *slot == id)
    }

    pub fn clear_layers(&mut self) {
        self.layers = [TextureId::NONE; TILE_LAYERS];
    }
}
