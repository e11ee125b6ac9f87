//! Landmass identification and territory merging.
//!
//! After the coastline trace and the flood fill have stamped a landmass id
//! on every non-boundary tile, the merger resolves the leftovers: boundary
//! tiles adopt a neighbouring id, the largest all-water component becomes
//! the ocean, and mutually enclosed landmasses (a lake inside a continent)
//! collapse into one id through an explicit union-find. The ocean never
//! merges into anything.
//!
//! Parallel passes here only ever read neighbours; every neighbour-affecting
//! write is buffered per worker and applied afterwards, so the result is
//! independent of scheduling.

use std::sync::Mutex;

use crate::error::WorldError;
use crate::fill;
use crate::grid::{TileGrid, TileRect};
use crate::scan::{self, ScanOptions, MAX_WORKERS};
use crate::tile::{Tile, TileFlags};
use crate::trace;

/// Fixed 8-neighbour inspection order; keeps adoption deterministic.
const NEIGHBOURS_8: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// One connected landmass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Landmass {
    /// 1-based id; 0 is reserved for unassigned/boundary tiles.
    pub id: u16,
    pub area: usize,
    /// True while every tile of the component sits at or below sea level.
    pub is_water: bool,
}

/// Union-find over landmass ids with path compression on every lookup.
/// The canonical representative of a set is its smallest id.
pub struct UnionFind {
    parent: Vec<u16>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u16).collect(),
        }
    }

    pub fn find(&mut self, id: u16) -> u16 {
        let mut root = id;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        // Compress the chain behind us.
        let mut cur = id;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    pub fn union(&mut self, a: u16, b: u16) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        // The higher id is rewritten to the lower.
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi as usize] = lo;
    }

    /// Fully resolved rewrite table.
    pub fn into_table(mut self) -> Vec<u16> {
        (0..self.parent.len() as u16).map(|i| self.find(i)).collect()
    }
}

/// Id of the ocean: the largest-area landmass among the all-water ones.
/// Ties go to the smaller id.
pub fn ocean_id(records: &[Landmass]) -> Option<u16> {
    records
        .iter()
        .filter(|r| r.is_water && r.area > 0)
        .max_by(|a, b| a.area.cmp(&b.area).then(b.id.cmp(&a.id)))
        .map(|r| r.id)
}

/// Step 1: every id-0 tile copies the first non-zero id among its
/// 8 neighbours. Reads see only pre-pass values; writes are buffered.
fn adopt_boundary_tiles(
    grid: &mut TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    records: &mut [Landmass],
) -> Result<(), WorldError> {
    let adoptions: Vec<Mutex<Vec<(i32, i32, u16)>>> =
        (0..MAX_WORKERS).map(|_| Mutex::new(Vec::new())).collect();

    let visitor = |worker: usize, grid: &TileGrid, x: i32, y: i32| {
        if grid.tile(x, y).landmass != 0 {
            return;
        }
        for (dx, dy) in NEIGHBOURS_8 {
            let id = grid.tile(x + dx, y + dy).landmass;
            if id != 0 {
                adoptions[worker].lock().unwrap().push((x, y, id));
                return;
            }
        }
    };
    scan::for_each_tile_ref(grid, rect, opts, &[&visitor], None)?;

    for slot in &adoptions {
        for &(x, y, id) in slot.lock().unwrap().iter() {
            grid.tile_mut(x, y).landmass = id;
            records[id as usize].area += 1;
        }
    }
    Ok(())
}

/// Step 3: record every adjacency between two distinct non-ocean ids, then
/// union them. Pairs are deduplicated and sorted first, so the final
/// partition does not depend on scan order.
fn record_merges(
    grid: &TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    ocean: Option<u16>,
    uf: &mut UnionFind,
) -> Result<(), WorldError> {
    let buffers: Vec<Mutex<Vec<(u16, u16)>>> =
        (0..MAX_WORKERS).map(|_| Mutex::new(Vec::new())).collect();

    let visitor = |worker: usize, grid: &TileGrid, x: i32, y: i32| {
        let a = grid.tile(x, y).landmass;
        if a == 0 || Some(a) == ocean {
            return;
        }
        for (dx, dy) in NEIGHBOURS_8 {
            let b = grid.tile(x + dx, y + dy).landmass;
            if b != 0 && b != a && Some(b) != ocean {
                let pair = if a < b { (a, b) } else { (b, a) };
                buffers[worker].lock().unwrap().push(pair);
            }
        }
    };
    scan::for_each_tile_ref(grid, rect, opts, &[&visitor], None)?;

    let mut pairs: Vec<(u16, u16)> = Vec::new();
    for slot in &buffers {
        pairs.extend(slot.lock().unwrap().iter().copied());
    }
    pairs.sort_unstable();
    pairs.dedup();
    for (lo, hi) in pairs {
        uf.union(lo, hi);
    }
    Ok(())
}

/// Post-process landmass ids: adopt boundary tiles, pick the ocean, merge
/// mutually enclosed landmasses, rewrite every tile to its canonical id.
pub fn merge_territories(
    grid: &mut TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    records: &mut Vec<Landmass>,
) -> Result<(), WorldError> {
    rect.validate(grid)?;

    adopt_boundary_tiles(grid, rect, opts, records)?;

    let ocean = ocean_id(records);

    let mut uf = UnionFind::new(records.len());
    record_merges(grid, rect, opts, ocean, &mut uf)?;
    let table = uf.into_table();

    // Step 4: resolve every tile through the rewrite table.
    let rewrite = |_worker: usize, tile: &mut Tile, _x: i32, _y: i32| {
        tile.landmass = table[tile.landmass as usize];
    };
    scan::for_each_tile(grid, rect, opts, &[&rewrite], None)?;

    for id in 1..records.len() {
        let target = table[id] as usize;
        if target != id {
            records[target].area += records[id].area;
            // A merged-in lake does not make the continent water.
            records[target].is_water &= records[id].is_water;
            records[id].area = 0;
        }
    }
    Ok(())
}

/// The composed operation: coastline trace, flood fill assigning landmass
/// ids, then the merge passes. Returns the surviving landmass records.
pub fn identify_landmasses(
    grid: &mut TileGrid,
    rect: TileRect,
    sea_level: f64,
    opts: ScanOptions,
) -> Result<Vec<Landmass>, WorldError> {
    rect.validate(grid)?;

    let reset = |_worker: usize, tile: &mut Tile, _x: i32, _y: i32| {
        tile.landmass = 0;
    };
    scan::for_each_tile(grid, rect, opts, &[&reset], None)?;

    // Land/water edge; dry tiles are the inside.
    let inside = move |g: &TileGrid, x: i32, y: i32| g.tile(x, y).height > sea_level;
    trace::trace_boundaries(grid, rect, &inside, &mut |_g, _x, _y| {})?;

    let mut records: Vec<Landmass> = vec![Landmass {
        id: 0,
        area: 0,
        is_water: false,
    }];
    let mut overflow = false;

    let is_boundary =
        |g: &TileGrid, x: i32, y: i32| g.tile(x, y).flags.contains(TileFlags::BORDER);
    fill::fill_groups(grid, rect, &is_boundary, &mut |g, x, y, group| {
        let id64 = group as u64 + 1;
        if id64 > u64::from(u16::MAX) {
            overflow = true;
            return;
        }
        let id = id64 as u16;
        if records.len() <= id as usize {
            records.push(Landmass {
                id,
                area: 0,
                is_water: true,
            });
        }
        let tile = g.tile_mut(x, y);
        tile.landmass = id;
        let rec = &mut records[id as usize];
        rec.area += 1;
        if tile.height > sea_level {
            rec.is_water = false;
        }
    })?;
    if overflow {
        return Err(WorldError::TooManyLandmasses(u16::MAX));
    }

    merge_territories(grid, rect, opts, &mut records)?;

    records.retain(|r| r.id != 0 && r.area > 0);
    Ok(records)
}
