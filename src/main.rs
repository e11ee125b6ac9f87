use clap::Parser;
use std::io::Write;
use std::time::Duration;

use overworld::ascii;
use overworld::worldgen::{self, GenerationParams};

#[derive(Parser, Debug)]
#[command(name = "overworld")]
#[command(about = "Generate a procedural overworld grid")]
struct Args {
    /// Grid width in regions (one region is 32x32 tiles)
    #[arg(short = 'W', long, default_value = "8")]
    width_regions: usize,

    /// Grid height in regions
    #[arg(short = 'H', long, default_value = "8")]
    height_regions: usize,

    /// Random seed (uses a random seed if not specified)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Worker threads (defaults to the available cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Erosion particles per tile
    #[arg(long, default_value = "0.5")]
    erosion_coverage: f64,

    /// Total settlement population budget
    #[arg(long, default_value = "4000")]
    population: u32,

    /// Print an ASCII preview of the finished map
    #[arg(long)]
    preview: bool,

    /// Print the generation summary as JSON
    #[arg(long)]
    stats_json: bool,
}

#[derive(serde::Serialize)]
struct Summary {
    seed: u64,
    width: i32,
    height: i32,
    min_height: f64,
    max_height: f64,
    sea_level: f64,
    alpine_level: f64,
    forest_level: f64,
    landmasses: usize,
    largest_landmass_area: usize,
    ocean_area: usize,
    settlements: u32,
}

fn main() {
    let args = Args::parse();

    let mut params = GenerationParams {
        regions_x: args.width_regions,
        regions_y: args.height_regions,
        erosion_coverage: args.erosion_coverage,
        total_population: args.population,
        ..GenerationParams::default()
    };
    if let Some(threads) = args.threads {
        params.threads = threads;
    }
    let seed = args.seed.unwrap_or_else(rand::random);

    println!(
        "Generating {}x{} tiles (seed {seed}, {} threads)",
        args.width_regions * overworld::grid::REGION_SIZE,
        args.height_regions * overworld::grid::REGION_SIZE,
        params.threads,
    );

    let mut progress = |fraction: f64, elapsed: Duration| -> bool {
        let pct = fraction * 100.0;
        let secs = elapsed.as_secs_f64();
        let eta = if fraction > 0.01 {
            secs / fraction - secs
        } else {
            0.0
        };
        print!("\r  {pct:5.1}%  elapsed {secs:6.1}s  eta {eta:6.1}s ");
        let _ = std::io::stdout().flush();
        true
    };

    let world = match worldgen::generate(&params, seed, Some(&mut progress)) {
        Ok(world) => world,
        Err(err) => {
            eprintln!("\ngeneration failed: {err}");
            std::process::exit(1);
        }
    };
    println!();

    let ocean = overworld::landmass::ocean_id(&world.landmasses);
    let summary = Summary {
        seed,
        width: world.grid.width(),
        height: world.grid.height(),
        min_height: world.stats.min_height,
        max_height: world.stats.max_height,
        sea_level: world.stats.sea_level,
        alpine_level: world.stats.alpine_level,
        forest_level: world.stats.forest_level,
        landmasses: world.landmasses.len(),
        largest_landmass_area: world
            .landmasses
            .iter()
            .filter(|l| !l.is_water)
            .map(|l| l.area)
            .max()
            .unwrap_or(0),
        ocean_area: ocean
            .and_then(|id| world.landmasses.iter().find(|l| l.id == id))
            .map(|l| l.area)
            .unwrap_or(0),
        settlements: world.settlements,
    };

    if args.stats_json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("stats serialization failed: {err}"),
        }
    } else {
        println!("  {}", world.seeds);
        println!(
            "  height {:.1}..{:.1}  sea {:.2}  alpine {:.2}",
            summary.min_height, summary.max_height, summary.sea_level, summary.alpine_level,
        );
        println!(
            "  {} landmasses (largest {} tiles, ocean {} tiles), {} settlements",
            summary.landmasses,
            summary.largest_landmass_area,
            summary.ocean_area,
            summary.settlements,
        );
    }

    if args.preview {
        println!("{}", ascii::render(&world, 96));
    }
}
