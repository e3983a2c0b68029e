#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Cave Engine
//!
//! A volumetric cave terrain engine: procedural density, marching-cubes
//! surfaces, a sliding window of chunks around an observer, mesh collision,
//! spherical carving, flow-field navigation and background A* path search.
//!
//! ## Key Modules
//!
//! * `terrain_state` - `TerrainState`, the per-session coordinator, and every
//!   subsystem it owns
//!
//! ## Architecture
//!
//! The engine is driven by a single owning thread calling
//! `TerrainState::update` once per tick. Heavy kernels (density generation,
//! extraction, flood fill, collision) run as data-parallel dispatches on a
//! shared compute pool and block on a small readback; path searches are the
//! only work that leaves the owning thread.
//!
//! ## Usage
//!
//! ```no_run
//! fn main() {
//!     if let Err(error) = cave_engine::run() {
//!         eprintln!("{error}");
//!     }
//! }
//! ```
//!
//! ## Performance Considerations
//!
//! * Chunks share their boundary sample layer, so the window stays seamless
//!   without stitching
//! * Sliding the window recycles chunk storage instead of reallocating it
//! * Navigation rebuilds are gated on observer movement and terrain edits

use std::cell::RefCell;
use std::rc::Rc;

use cgmath::{Point3, Vector3};
use log::{info, warn};
use web_time::{Duration, Instant};

pub mod terrain_state;

pub use terrain_state::carving::CarvedRegion;
pub use terrain_state::config::{ConfigError, TerrainConfig, TerrainError};
pub use terrain_state::density::{DensityFunction, DensitySource};
pub use terrain_state::events::TerrainEvent;
pub use terrain_state::pathfinding::{PathFailure, PathOutcome};
pub use terrain_state::physics::{Ray, RayHit, SphereQueryResult, SphereResolution};
pub use terrain_state::{TerrainState, TickReport};

/// Ticks the headless session runs for.
const SESSION_TICKS: usize = 240;

/// Distance the scripted observer moves per tick.
const OBSERVER_SPEED: f32 = 0.5;

/// Tick on which the session carves below the observer and requests a path.
const CARVE_TICK: usize = 60;

/// Runs a scripted headless session and logs what the terrain did.
///
/// The config is read from the JSON file named by the first command line
/// argument, or defaults otherwise. An observer walks along the X axis through
/// the cave, sliding the window as it goes; partway through it carves the
/// ground below itself and asks for a path back to where it started.
///
/// # Errors
/// Returns the error that prevented the session from starting.
pub fn run() -> Result<(), TerrainError> {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading terrain config from {path}");
            TerrainConfig::from_json_file(&path)?
        }
        None => TerrainConfig::default(),
    };

    let started = Instant::now();
    let mut terrain = TerrainState::new(config)?;
    info!("Terrain session ready in {:?}", started.elapsed());

    let grid_center = {
        let mapping = terrain.grid().mapping();
        let min = mapping.bounds_min();
        let max = mapping.voxel_max().map(|c| c as f32);
        Point3::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0, (min.z + max.z) / 2.0)
    };
    let Some(start) = find_open_point(&terrain, grid_center) else {
        warn!("No open terrain around {:?}, nothing to explore", grid_center);
        return Ok(());
    };
    info!("Observer starts at {:?}", start);

    let path_lengths: Rc<RefCell<Vec<usize>>> = Rc::default();
    let mut observer = start;
    let mut shifts = 0;
    let mut regenerations = 0;
    let mut visited_total = 0;
    let tick_started = Instant::now();

    for tick in 0..SESSION_TICKS {
        observer.x += OBSERVER_SPEED;
        if let Some(open) = find_open_point(&terrain, observer) {
            observer = open;
        }

        let report = terrain.update(observer);
        shifts += usize::from(report.window_shift.is_some());
        if let Some(stats) = report.flood_fill {
            regenerations += 1;
            visited_total += stats.visited;
        }

        if tick == CARVE_TICK {
            match terrain.carve_along_ray(observer, -Vector3::unit_y(), 3.0, 0.5, true) {
                Some((hit, regions)) => info!(
                    "Carved at {:?}, {} chunks touched",
                    hit.position,
                    regions.len()
                ),
                None => warn!("Nothing below the observer to carve"),
            }

            let lengths = Rc::clone(&path_lengths);
            terrain.request_path(observer, start, move |outcome| match outcome {
                Ok(path) => {
                    info!("Path back to the start has {} waypoints", path.len());
                    lengths.borrow_mut().push(path.len());
                }
                Err(failure) => warn!("Path back to the start failed: {failure}"),
            });
        }

        let direction = terrain.sample_flow_direction(observer + Vector3::new(-2.0, 0.0, 0.0));
        log::trace!("Tick {tick}: observer {:?}, flow behind {:?}", observer, direction);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while terrain.pending_paths() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
        terrain.update(observer);
    }

    let resolution = terrain.resolve_sphere(observer, 1.0);
    info!(
        "Session finished in {:?}: {} ticks, {} window shifts, {} flow field rebuilds",
        tick_started.elapsed(),
        SESSION_TICKS,
        shifts,
        regenerations,
    );
    info!(
        "{} voxels visited, {} paths delivered {:?}, final sphere resolved: {}",
        visited_total,
        terrain.delivered_paths(),
        path_lengths.borrow(),
        resolution.resolved,
    );
    info!("Remaining events: {}", terrain.drain_events().len());
    Ok(())
}

/// The open voxel centre nearest to `around` in its vertical column, searching
/// up and down alternately.
fn find_open_point(terrain: &TerrainState, around: Point3<f32>) -> Option<Point3<f32>> {
    let config = terrain.config();
    let grid = terrain.grid();
    let (min, max) = grid.voxel_bounds();
    let base = around.map(|c| c.round() as i32);

    (0..=(max.y - min.y)).find_map(|offset| {
        [base.y + offset, base.y - offset]
            .into_iter()
            .map(|y| Point3::new(base.x, y, base.z))
            .find(|voxel| {
                grid.density_at_voxel(*voxel)
                    .is_some_and(|density| config.is_open(density))
            })
            .map(|voxel| voxel.map(|c| c as f32))
    })
}
