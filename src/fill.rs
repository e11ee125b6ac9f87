//! Scanline flood fill over the non-boundary tiles.
//!
//! Partitions the non-boundary tiles of a range into maximal 4-connected
//! components, invoking a callback with an incrementing group id for every
//! filled tile. Works on horizontal runs with an explicit segment stack, so
//! memory stays bounded for arbitrarily large components. Rows wrap when the
//! range spans the full grid dimension (the torus case); otherwise the range
//! edge acts as a boundary.
//!
//! The filler owns the `FILLED` and `QUEUED` tile flags and clears both at
//! the start of every operation. The boundary predicate must be stable for
//! the duration of the call.

use crate::error::WorldError;
use crate::grid::{TileGrid, TileRect};
use crate::tile::TileFlags;

/// Boundary predicate over tile coordinates.
pub type BoundaryPredicate<'a> = &'a dyn Fn(&TileGrid, i32, i32) -> bool;

/// Fill callback: `(grid, x, y, group_id)`.
pub type FillFn<'a> = &'a mut dyn FnMut(&mut TileGrid, i32, i32, u32);

/// A queued segment seed. Popping it re-extends to the maximal run on its
/// row, so one seed per contiguous run is enough.
#[derive(Clone, Copy)]
struct Seed {
    x: i32,
    y: i32,
}

struct Filler<'a> {
    rect: TileRect,
    wrap_x: bool,
    wrap_y: bool,
    is_boundary: BoundaryPredicate<'a>,
}

impl Filler<'_> {
    fn open(&self, grid: &TileGrid, x: i32, y: i32) -> bool {
        self.rect.contains(x, y) && !(self.is_boundary)(grid, x, y)
    }

    fn filled(&self, grid: &TileGrid, x: i32, y: i32) -> bool {
        grid.tile(x, y).flags.contains(TileFlags::FILLED)
    }

    /// Step left within the row, wrapping only when the range spans the
    /// grid width.
    fn left_of(&self, x: i32) -> Option<i32> {
        if x > self.rect.x {
            Some(x - 1)
        } else if self.wrap_x {
            Some(self.rect.right() - 1)
        } else {
            None
        }
    }

    fn right_of(&self, x: i32) -> Option<i32> {
        if x < self.rect.right() - 1 {
            Some(x + 1)
        } else if self.wrap_x {
            Some(self.rect.x)
        } else {
            None
        }
    }

    fn row_below(&self, y: i32) -> Option<i32> {
        if y < self.rect.bottom() - 1 {
            Some(y + 1)
        } else if self.wrap_y {
            Some(self.rect.y)
        } else {
            None
        }
    }

    fn row_above(&self, y: i32) -> Option<i32> {
        if y > self.rect.y {
            Some(y - 1)
        } else if self.wrap_y {
            Some(self.rect.bottom() - 1)
        } else {
            None
        }
    }

    /// Fill the maximal run around a popped seed and queue uncovered runs on
    /// the rows above and below.
    fn fill_segment(
        &self,
        grid: &mut TileGrid,
        seed: Seed,
        group: u32,
        stack: &mut Vec<Seed>,
        on_fill: &mut dyn FnMut(&mut TileGrid, i32, i32, u32),
    ) {
        if !self.open(grid, seed.x, seed.y) || self.filled(grid, seed.x, seed.y) {
            return;
        }
        let y = seed.y;
        let row_span = self.rect.width as i32;

        // Extend left, then right, stopping at boundary tiles, filled tiles,
        // or once the run has consumed the whole row (full wrap).
        let mut run_start = seed.x;
        let mut run_len = 1i32;
        while run_len < row_span {
            let Some(nx) = self.left_of(run_start) else {
                break;
            };
            if !self.open(grid, nx, y) || self.filled(grid, nx, y) {
                break;
            }
            run_start = nx;
            run_len += 1;
        }
        let mut run_end = seed.x;
        while run_len < row_span {
            let Some(nx) = self.right_of(run_end) else {
                break;
            };
            if !self.open(grid, nx, y) || self.filled(grid, nx, y) {
                break;
            }
            run_end = nx;
            run_len += 1;
        }

        // Fill the run.
        let mut x = run_start;
        for _ in 0..run_len {
            if !self.filled(grid, x, y) {
                grid.tile_mut(x, y).flags.insert(TileFlags::FILLED);
                on_fill(grid, x, y, group);
            }
            x = self.right_of(x).unwrap_or(x);
        }

        // Queue one seed per uncovered open run directly above and below.
        for ny in [self.row_above(y), self.row_below(y)].into_iter().flatten() {
            let mut in_run = false;
            let mut x = run_start;
            for _ in 0..run_len {
                if self.open(grid, x, ny) && !self.filled(grid, x, ny) {
                    if !grid.tile(x, ny).flags.contains(TileFlags::QUEUED) {
                        if !in_run {
                            stack.push(Seed { x, y: ny });
                        }
                        grid.tile_mut(x, ny).flags.insert(TileFlags::QUEUED);
                    }
                    in_run = true;
                } else {
                    in_run = false;
                }
                x = self.right_of(x).unwrap_or(x);
            }
        }
    }
}

/// Flood-fill the non-boundary tiles of `rect` into 4-connected groups.
///
/// Every non-boundary tile is visited exactly once; the callback receives
/// the group id, starting at 0 and incrementing per component. Returns the
/// number of groups found.
pub fn fill_groups(
    grid: &mut TileGrid,
    rect: TileRect,
    is_boundary: BoundaryPredicate<'_>,
    on_fill: FillFn<'_>,
) -> Result<u32, WorldError> {
    rect.validate(grid)?;

    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let flags = &mut grid.tile_mut(x, y).flags;
            flags.remove(TileFlags::FILLED);
            flags.remove(TileFlags::QUEUED);
        }
    }

    let filler = Filler {
        rect,
        wrap_x: rect.width as i32 == grid.width(),
        wrap_y: rect.height as i32 == grid.height(),
        is_boundary,
    };

    let mut groups = 0u32;
    let mut stack: Vec<Seed> = Vec::new();

    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            if filler.filled(grid, x, y) || !filler.open(grid, x, y) {
                continue;
            }

            // Fresh component: drain a whole segment stack under one id.
            let group = groups;
            groups += 1;
            stack.push(Seed { x, y });
            while let Some(seed) = stack.pop() {
                filler.fill_segment(grid, seed, group, &mut stack, &mut *on_fill);
            }
        }
    }

    Ok(groups)
}
