//! Boundary extraction between an inside predicate and its complement.
//!
//! The exact mode walks the inside/outside edge with square tracing: turn
//! left while standing on an inside tile, turn right on an outside tile,
//! step forward once per iteration. Each tile carries four directional trace
//! flags; a walker about to leave a tile in a direction it has already been
//! left in has re-entered traced territory and abandons its sub-trace. A
//! walk also ends when it returns to its start tile with its starting
//! heading (Jacob's stopping criterion).
//!
//! The approximate mode is a flat parallel pass marking every inside tile
//! with an outside 4-neighbour; it skips the walk ordering but saturates the
//! same border flag, which is all the calibration-adjacent callers need.
//!
//! Both modes run on the torus; walks cross the wrap seam freely.

use std::sync::Mutex;

use crate::error::WorldError;
use crate::grid::{TileGrid, TileRect};
use crate::scan::{self, ScanOptions, MAX_WORKERS};
use crate::tile::TileFlags;

/// Inside predicate over tile coordinates.
pub type InsideFn<'a> = &'a (dyn Fn(&TileGrid, i32, i32) -> bool + Sync);

/// Invoked once per boundary tile, after its border flag is set.
pub type BoundaryFn<'a> = &'a mut dyn FnMut(&mut TileGrid, i32, i32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Heading {
    North,
    East,
    South,
    West,
}

impl Heading {
    fn left(self) -> Heading {
        match self {
            Heading::North => Heading::West,
            Heading::West => Heading::South,
            Heading::South => Heading::East,
            Heading::East => Heading::North,
        }
    }

    fn right(self) -> Heading {
        match self {
            Heading::North => Heading::East,
            Heading::East => Heading::South,
            Heading::South => Heading::West,
            Heading::West => Heading::North,
        }
    }

    fn step(self) -> (i32, i32) {
        match self {
            Heading::North => (0, -1),
            Heading::East => (1, 0),
            Heading::South => (0, 1),
            Heading::West => (-1, 0),
        }
    }

    fn trace_flag(self) -> TileFlags {
        match self {
            Heading::North => TileFlags::TRACE_N,
            Heading::East => TileFlags::TRACE_E,
            Heading::South => TileFlags::TRACE_S,
            Heading::West => TileFlags::TRACE_W,
        }
    }
}

fn clear_trace_state(grid: &mut TileGrid, rect: &TileRect) {
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let flags = &mut grid.tile_mut(x, y).flags;
            flags.remove(TileFlags::TRACE_ALL);
            flags.remove(TileFlags::BORDER);
        }
    }
}

/// An inside tile with an outside 4-neighbour sits on the boundary.
fn touches_outside(
    grid: &TileGrid,
    rect: &TileRect,
    inside: InsideFn<'_>,
    x: i32,
    y: i32,
) -> bool {
    [(0, -1), (1, 0), (0, 1), (-1, 0)].iter().any(|&(dx, dy)| {
        let nx = grid.wrap_x(x + dx);
        let ny = grid.wrap_y(y + dy);
        !rect.contains(nx, ny) || !inside(grid, nx, ny)
    })
}

/// Walk one sub-trace from `start`. Returns the number of new boundary
/// tiles recorded.
fn trace_from(
    grid: &mut TileGrid,
    rect: &TileRect,
    inside: InsideFn<'_>,
    on_boundary: &mut dyn FnMut(&mut TileGrid, i32, i32),
    start: (i32, i32),
) -> usize {
    let start_heading = Heading::North;
    let mut heading = start_heading;
    let (mut x, mut y) = start;
    let mut recorded = 0;

    loop {
        let here_inside = rect.contains(x, y) && inside(grid, x, y);

        if here_inside {
            if !grid.tile(x, y).flags.contains(TileFlags::BORDER)
                && touches_outside(grid, rect, inside, x, y)
            {
                grid.tile_mut(x, y).flags.insert(TileFlags::BORDER);
                recorded += 1;
                on_boundary(grid, x, y);
            }
            heading = heading.left();
        } else {
            heading = heading.right();
        }

        // Direction-tagged visitation: leaving a tile the same way twice
        // means this edge was already traced.
        let flag = heading.trace_flag();
        if grid.tile(x, y).flags.contains(flag) {
            return recorded;
        }
        grid.tile_mut(x, y).flags.insert(flag);

        let (dx, dy) = heading.step();
        x = grid.wrap_x(x + dx);
        y = grid.wrap_y(y + dy);

        if (x, y) == start && heading == start_heading {
            return recorded;
        }
    }
}

/// Exact boundary trace. Finds the boundary of every maximal inside region
/// in `rect` and invokes the callback once per boundary tile. Returns the
/// boundary tile count.
pub fn trace_boundaries(
    grid: &mut TileGrid,
    rect: TileRect,
    inside: InsideFn<'_>,
    on_boundary: BoundaryFn<'_>,
) -> Result<usize, WorldError> {
    rect.validate(grid)?;
    clear_trace_state(grid, &rect);

    let mut count = 0;
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let flags = grid.tile(x, y).flags;
            if flags.contains(TileFlags::TRACE_ALL) || flags.contains(TileFlags::BORDER) {
                continue;
            }
            if !inside(grid, x, y) {
                continue;
            }
            count += trace_from(grid, &rect, inside, &mut *on_boundary, (x, y));
        }
    }
    Ok(count)
}

/// Approximate boundary trace: one parallel read-only pass collects every
/// inside tile with an outside 4-neighbour, then a sequential sweep marks
/// them. Cheaper than the walk and good enough when only the border flag
/// matters.
pub fn trace_boundaries_fast(
    grid: &mut TileGrid,
    rect: TileRect,
    opts: ScanOptions,
    inside: InsideFn<'_>,
    on_boundary: BoundaryFn<'_>,
) -> Result<usize, WorldError> {
    rect.validate(grid)?;
    clear_trace_state(grid, &rect);

    let found: Vec<Mutex<Vec<(i32, i32)>>> =
        (0..MAX_WORKERS).map(|_| Mutex::new(Vec::new())).collect();

    let in_rect_inside = |grid: &TileGrid, x: i32, y: i32| -> bool {
        rect.contains(x, y) && inside(grid, x, y)
    };

    let visitor = |worker: usize, grid: &TileGrid, x: i32, y: i32| {
        if !inside(grid, x, y) {
            return;
        }
        let edge = [(0, -1), (1, 0), (0, 1), (-1, 0)].iter().any(|&(dx, dy)| {
            !in_rect_inside(grid, grid.wrap_x(x + dx), grid.wrap_y(y + dy))
        });
        if edge {
            found[worker].lock().unwrap().push((x, y));
        }
    };
    scan::for_each_tile_ref(grid, rect, opts, &[&visitor], None)?;

    let mut count = 0;
    for slot in &found {
        for &(x, y) in slot.lock().unwrap().iter() {
            grid.tile_mut(x, y).flags.insert(TileFlags::BORDER);
            count += 1;
            on_boundary(grid, x, y);
        }
    }
    Ok(count)
}

/// Trace iso-height contour lines at `levels` evenly spaced thresholds
/// strictly between `min_height` and `max_height`, marking the shared
/// contour flag. Returns the total number of contour tiles marked.
pub fn trace_contours(
    grid: &mut TileGrid,
    rect: TileRect,
    levels: usize,
    min_height: f64,
    max_height: f64,
) -> Result<usize, WorldError> {
    rect.validate(grid)?;

    let mut marked = 0;
    for level in 1..=levels {
        let threshold =
            min_height + (max_height - min_height) * level as f64 / (levels + 1) as f64;
        let inside = move |g: &TileGrid, x: i32, y: i32| g.tile(x, y).height < threshold;
        marked += trace_boundaries(grid, rect, &inside, &mut |g, x, y| {
            g.tile_mut(x, y).flags.insert(TileFlags::CONTOUR);
        })?;
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inside predicate for an axis-aligned rectangle.
    fn rect_inside(x0: i32, y0: i32, x1: i32, y1: i32) -> impl Fn(&TileGrid, i32, i32) -> bool + Sync
    {
        move |_g: &TileGrid, x: i32, y: i32| x >= x0 && x < x1 && y >= y0 && y < y1
    }

    fn border_tiles(grid: &TileGrid) -> Vec<(i32, i32)> {
        let mut tiles = Vec::new();
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                if grid.tile(x, y).flags.contains(TileFlags::BORDER) {
                    tiles.push((x, y));
                }
            }
        }
        tiles
    }

    #[test]
    fn test_rectangle_perimeter_exact() {
        let mut grid = TileGrid::new(2, 2).unwrap();
        let inside = rect_inside(10, 12, 20, 18);
        let mut called = Vec::new();
        let count = trace_boundaries(
            &mut grid,
            TileRect::full(&grid),
            &inside,
            &mut |_g, x, y| called.push((x, y)),
        )
        .unwrap();

        // 10x6 rectangle: perimeter is 2*(10 + 6) - 4 tiles.
        assert_eq!(count, 28);
        assert_eq!(called.len(), 28);

        let border = border_tiles(&grid);
        assert_eq!(border.len(), 28);
        // Corners, explicitly.
        for corner in [(10, 12), (19, 12), (10, 17), (19, 17)] {
            assert!(border.contains(&corner), "missing corner {corner:?}");
        }
        // Interior untouched.
        assert!(!border.contains(&(11, 13)));
        assert!(!border.contains(&(15, 15)));
    }

    #[test]
    fn test_rectangle_across_wrap_seam() {
        let mut grid = TileGrid::new(2, 1).unwrap();
        let w = grid.width();
        // A band crossing the x seam: inside when x < 4 or x >= w - 4.
        let inside = move |_g: &TileGrid, x: i32, _y: i32| x < 4 || x >= w - 4;
        let band_inside = move |g: &TileGrid, x: i32, y: i32| {
            inside(g, x, y) && (8..12).contains(&y)
        };

        let count = trace_boundaries(
            &mut grid,
            TileRect::full(&grid),
            &band_inside,
            &mut |_g, _x, _y| {},
        )
        .unwrap();

        // The band is an 8x4 rectangle on the torus: 2*(8 + 4) - 4 = 20.
        assert_eq!(count, 20);
        let border = border_tiles(&grid);
        // Seam columns are interior to the band, not boundary.
        assert!(!border.contains(&(0, 9)));
        assert!(!border.contains(&(w - 1, 9)));
        // The outer corners across the seam are.
        assert!(border.contains(&(3, 8)));
        assert!(border.contains(&(w - 4, 11)));
    }

    #[test]
    fn test_all_inside_has_no_boundary() {
        let mut grid = TileGrid::new(2, 2).unwrap();
        let inside = |_g: &TileGrid, _x: i32, _y: i32| true;
        let count = trace_boundaries(
            &mut grid,
            TileRect::full(&grid),
            &inside,
            &mut |_g, _x, _y| {},
        )
        .unwrap();
        // On a torus an all-inside field has no edge anywhere.
        assert_eq!(count, 0);
        assert!(border_tiles(&grid).is_empty());
    }

    #[test]
    fn test_two_disjoint_regions_both_traced() {
        let mut grid = TileGrid::new(2, 2).unwrap();
        let a = rect_inside(2, 2, 6, 6);
        let b = rect_inside(20, 20, 23, 23);
        let inside =
            move |g: &TileGrid, x: i32, y: i32| a(g, x, y) || b(g, x, y);
        let count = trace_boundaries(
            &mut grid,
            TileRect::full(&grid),
            &inside,
            &mut |_g, _x, _y| {},
        )
        .unwrap();
        // 4x4 square: 12 boundary tiles; 3x3 square: 8.
        assert_eq!(count, 12 + 8);
    }

    #[test]
    fn test_fast_mode_matches_exact_on_rectangle() {
        let inside = rect_inside(5, 5, 15, 11);

        let mut exact_grid = TileGrid::new(2, 2).unwrap();
        trace_boundaries(
            &mut exact_grid,
            TileRect::full(&exact_grid),
            &inside,
            &mut |_g, _x, _y| {},
        )
        .unwrap();

        let mut fast_grid = TileGrid::new(2, 2).unwrap();
        let fast_count = trace_boundaries_fast(
            &mut fast_grid,
            TileRect::full(&fast_grid),
            ScanOptions::with_threads(3),
            &inside,
            &mut |_g, _x, _y| {},
        )
        .unwrap();

        let exact: Vec<_> = border_tiles(&exact_grid);
        let mut fast: Vec<_> = border_tiles(&fast_grid);
        fast.sort_unstable();
        assert_eq!(fast_count, fast.len());
        // A solid rectangle has no interior-only edge subtleties, so the
        // two modes agree exactly.
        assert_eq!(exact, fast);
    }

    #[test]
    fn test_contours_mark_shared_flag() {
        let mut grid = TileGrid::new(2, 2).unwrap();
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                // Radial bump in the middle of the grid.
                let cx = (x - 32) as f64;
                let cy = (y - 32) as f64;
                grid.tile_mut(x, y).height = 50.0 - (cx * cx + cy * cy).sqrt();
            }
        }
        let marked =
            trace_contours(&mut grid, TileRect::full(&grid), 3, 0.0, 50.0).unwrap();
        assert!(marked > 0);

        let mut contour_tiles = 0;
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                if grid.tile(x, y).flags.contains(TileFlags::CONTOUR) {
                    contour_tiles += 1;
                }
            }
        }
        assert_eq!(contour_tiles, marked);
    }
}
