//! ASCII rendering of a generated world for the CLI.

use crate::tile::Tile;
use crate::worldgen::World;

/// One character per sampled tile, settlement features first.
fn tile_char(world: &World, tile: &Tile) -> char {
    let s = &world.settlement_textures;
    let t = &world.terrain;

    if tile.has_layer(s.door) {
        '+'
    } else if tile.has_layer(s.chimney) {
        'h'
    } else if tile.has_layer(s.wall) || tile.has_layer(s.roof) {
        'H'
    } else if tile.has_layer(s.major_path) {
        '='
    } else if tile.has_layer(s.minor_path) {
        '-'
    } else if tile.has_layer(t.water) {
        '~'
    } else if tile.has_layer(t.snow) {
        '*'
    } else if tile.has_layer(t.rock) {
        '^'
    } else if tile.has_layer(t.forest) {
        'T'
    } else if tile.has_layer(t.sand) {
        '.'
    } else if tile.has_layer(t.grass) {
        ','
    } else {
        ' '
    }
}

/// Render the world downsampled to at most `max_cols` columns.
pub fn render(world: &World, max_cols: usize) -> String {
    let grid = &world.grid;
    let step = ((grid.width() as usize + max_cols - 1) / max_cols).max(1) as i32;

    let cols = (grid.width() / step) as usize;
    let rows = (grid.height() / step) as usize;
    let mut out = String::with_capacity(rows * (cols + 1));

    let mut y = 0;
    while y < grid.height() {
        let mut x = 0;
        while x < grid.width() {
            out.push(tile_char(world, grid.tile(x, y)));
            x += step;
        }
        out.push('\n');
        y += step;
    }
    out
}
