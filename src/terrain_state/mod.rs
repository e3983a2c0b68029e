//! # Terrain State Module
//!
//! The session coordinator of the cave engine. `TerrainState` owns every
//! terrain subsystem and advances them once per tick around a moving observer.
//!
//! ## Key Components
//!
//! * `chunks` - The sliding window of chunks and their lifecycle
//! * `density` - Procedural density volumes and cross-chunk sampling
//! * `meshing` - Marching-cubes surface extraction
//! * `physics` - Raycasts and sphere queries against the chunk meshes
//! * `carving` - Spherical density edits
//! * `navigation` - Combined density block and flood-filled flow field
//! * `pathfinding` - Background A* over density snapshots
//! * `task_management` - The worker pool the pathfinder runs on
//! * `compute` - Data-parallel dispatch shared by every kernel
//!
//! ## Architecture
//!
//! Everything except path searches runs on the thread that owns
//! `TerrainState`. Density is written only by the chunk grid and the carver,
//! and every write is followed by re-extraction of the touched chunks before
//! any query reads them. Collision and navigation only borrow the grid.
//! Path searches receive an owned snapshot and report back through
//! callbacks run inside `update`.
//!
//! ## Tick Order
//!
//! 1. Slide the chunk window one step if the observer drifted from its centre
//! 2. Track the observer's voxel and chunk
//! 3. Patch navigation with the regions carved since the last tick
//! 4. Reassemble or regenerate the flow field if needed
//! 5. Deliver finished path searches
//!
//! ## Performance Considerations
//!
//! * At most one window slide per tick, so a diagonal crossing converges over
//!   two ticks
//! * The flow field is regenerated only when the observer's voxel changed or
//!   carving touched the navigation block

use std::sync::Arc;

use cgmath::{Point3, Vector3};

pub mod carving;
pub mod chunks;
pub mod compute;
pub mod config;
pub mod density;
pub mod events;
pub mod meshing;
pub mod navigation;
pub mod observer;
pub mod pathfinding;
pub mod physics;
pub mod task_management;

use carving::{CarveBrush, CarvedRegion, TerrainCarver};
use chunks::{ChunkGrid, WindowShift};
use compute::ComputeContext;
use config::{TerrainConfig, TerrainError};
use density::{DensityFunction, DensityGenerator, NoiseDensity, VerticalBand};
use events::{EventQueue, TerrainEvent};
use navigation::{FloodFillStats, NavigationGenerator};
use observer::{ObserverState, ObserverUpdates};
use pathfinding::{PathOutcome, PathParams, Pathfinder};
use physics::{
    ChunkBoundsBroadPhase, CollisionLayer, Ray, RayHit, SphereQueryResult, SphereResolution,
};

/// Displacement steps `resolve_sphere` takes before giving up.
pub const DEFAULT_RESOLVE_ITERATIONS: usize = 10;

/// What one [`TerrainState::update`] did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub observer: ObserverUpdates,
    pub window_shift: Option<WindowShift>,
    /// Present when the flow field was regenerated
    pub flood_fill: Option<FloodFillStats>,
    pub paths_delivered: usize,
}

/// Owns the chunk window and every subsystem reading or writing it.
///
/// # Examples
///
/// ```no_run
/// use cave_engine::{TerrainConfig, TerrainState};
/// use cgmath::Point3;
///
/// let mut terrain = TerrainState::new(TerrainConfig::default())?;
/// let observer = Point3::new(80.0, 20.0, 80.0);
/// loop {
///     terrain.update(observer);
///     let _direction = terrain.sample_flow_direction(Point3::new(70.0, 20.0, 75.0));
/// }
/// # Ok::<(), cave_engine::TerrainError>(())
/// ```
pub struct TerrainState {
    config: TerrainConfig,
    grid: ChunkGrid,
    collision: CollisionLayer,
    carver: TerrainCarver,
    navigation: NavigationGenerator,
    pathfinder: Pathfinder,
    observer: ObserverState,
    events: EventQueue,
}

impl TerrainState {
    /// Builds a session over fractal noise caves.
    pub fn new(config: TerrainConfig) -> Result<Self, TerrainError> {
        let function = Arc::new(NoiseDensity::from_config(&config));
        Self::with_density_function(config, function)
    }

    /// Builds a session whose density comes from `function`.
    ///
    /// # Arguments
    /// * `config` - Validated before anything is generated
    /// * `function` - World-space density in `[0, 1]`, clamped by the vertical band
    ///
    /// # Errors
    /// Returns [`TerrainError`] for an invalid config or when the compute pool
    /// or a path worker cannot be started.
    pub fn with_density_function(
        config: TerrainConfig,
        function: Arc<dyn DensityFunction>,
    ) -> Result<Self, TerrainError> {
        config.validate()?;

        let compute = Arc::new(ComputeContext::new(config.compute_threads)?);
        let generator = DensityGenerator::new(
            function,
            VerticalBand::from_config(&config),
            config.effective_chunk_size(),
        );
        let grid = ChunkGrid::new(&config, Arc::clone(&compute), generator);
        let navigation = NavigationGenerator::new(compute, &config);
        let pathfinder = Pathfinder::new(config.worker_threads, PathParams::from_config(&config))?;

        Ok(Self {
            collision: CollisionLayer::new(
                Box::new(ChunkBoundsBroadPhase),
                config.raycast_chunk_limit,
            ),
            carver: TerrainCarver,
            observer: ObserverState::default(),
            events: EventQueue::default(),
            config,
            grid,
            navigation,
            pathfinder,
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn observer(&self) -> &ObserverState {
        &self.observer
    }

    pub fn navigation(&self) -> &NavigationGenerator {
        &self.navigation
    }

    /// Advances the session by one tick with the observer at `observer`.
    pub fn update(&mut self, observer: Point3<f32>) -> TickReport {
        let window_shift = self.grid.slide_window(observer);
        if let Some(shift) = window_shift {
            self.navigation.invalidate();
            self.events.publish(TerrainEvent::ChunksShifted {
                axis: shift.axis,
                direction: shift.direction,
            });
        }

        let updates = self.observer.update(&self.grid, observer);

        let carved: Vec<CarvedRegion> = self
            .events
            .take_where(|event| matches!(event, TerrainEvent::VectorFieldShouldRegenerate { .. }))
            .into_iter()
            .flat_map(|event| match event {
                TerrainEvent::VectorFieldShouldRegenerate { regions } => regions,
                _ => Vec::new(),
            })
            .collect();
        if !carved.is_empty() {
            self.navigation.patch(&self.grid, &carved);
        }

        let flood_fill = self.navigation.update(&self.grid, observer);
        let paths_delivered = self.pathfinder.process();

        TickReport {
            observer: updates,
            window_shift,
            flood_fill,
            paths_delivered,
        }
    }

    /// First surface hit along `ray`, or `None`.
    pub fn raycast(&self, ray: &Ray) -> Option<RayHit> {
        self.collision.raycast(&self.grid, ray)
    }

    /// Nearest hit of each ray against the mesh of one chunk.
    pub fn raycast_batch(&self, chunk_index: Vector3<usize>, rays: &[Ray]) -> Vec<Option<RayHit>> {
        self.collision.raycast_batch(&self.grid, chunk_index, rays)
    }

    pub fn sphere_query(&self, center: Point3<f32>, radius: f32) -> SphereQueryResult {
        self.collision.sphere_query(&self.grid, center, radius)
    }

    /// Pushes a sphere out of the terrain using up to
    /// [`DEFAULT_RESOLVE_ITERATIONS`] displacement steps.
    pub fn resolve_sphere(&self, center: Point3<f32>, radius: f32) -> SphereResolution {
        self.resolve_sphere_with(center, radius, DEFAULT_RESOLVE_ITERATIONS)
    }

    pub fn resolve_sphere_with(
        &self,
        center: Point3<f32>,
        radius: f32,
        max_iterations: usize,
    ) -> SphereResolution {
        self.collision.resolve_sphere(&self.grid, center, radius, max_iterations)
    }

    /// Opens (`removal`) or fills terrain in a sphere around `center`.
    ///
    /// Touched chunks are re-extracted before this returns. The edit is
    /// published as [`TerrainEvent::TerrainCarved`], and the changed regions as
    /// [`TerrainEvent::VectorFieldShouldRegenerate`] for the next tick.
    ///
    /// # Returns
    /// The edited region of each touched chunk.
    pub fn carve(
        &mut self,
        center: Point3<f32>,
        radius: f32,
        rate: f32,
        removal: bool,
    ) -> Vec<CarvedRegion> {
        let brush = CarveBrush {
            center,
            radius,
            rate,
            removal,
        };
        let regions = self.carver.carve(&mut self.grid, &ChunkBoundsBroadPhase, brush);
        if regions.is_empty() {
            return regions;
        }

        self.events.publish(TerrainEvent::TerrainCarved {
            origin: center,
            radius,
            rate,
            removal,
        });
        self.events.publish(TerrainEvent::VectorFieldShouldRegenerate {
            regions: regions.clone(),
        });
        regions
    }

    /// Casts a ray and carves where it meets the surface.
    ///
    /// # Returns
    /// The hit and the carved regions, or `None` if the ray hit nothing.
    pub fn carve_along_ray(
        &mut self,
        origin: Point3<f32>,
        direction: Vector3<f32>,
        radius: f32,
        rate: f32,
        removal: bool,
    ) -> Option<(RayHit, Vec<CarvedRegion>)> {
        let ray = Ray::unbounded(origin, direction)?;
        let hit = self.raycast(&ray)?;
        let regions = self.carve(hit.position, radius, rate, removal);
        Some((hit, regions))
    }

    /// Flow direction toward the observer at `world`, zero where no route is
    /// known.
    pub fn sample_flow_direction(&self, world: Point3<f32>) -> Vector3<f32> {
        self.navigation.sample(world)
    }

    /// Queues a background path search over the current density.
    ///
    /// `callback` runs inside a later [`update`](Self::update) with the waypoint
    /// voxels or the reason the search failed.
    ///
    /// # Returns
    /// The request id.
    pub fn request_path(
        &mut self,
        start: Point3<f32>,
        goal: Point3<f32>,
        callback: impl FnOnce(PathOutcome) + 'static,
    ) -> u64 {
        let snapshot = self.grid.snapshot();
        self.pathfinder.request_path(snapshot, start, goal, callback)
    }

    /// Path requests whose callback has not run yet.
    pub fn pending_paths(&self) -> usize {
        self.pathfinder.pending()
    }

    pub fn delivered_paths(&self) -> usize {
        self.pathfinder.delivered()
    }

    /// Re-extracts every chunk mesh.
    pub fn regenerate_all_meshes(&mut self) -> usize {
        self.grid.regenerate_all_meshes()
    }

    /// Removes and returns every event not yet consumed.
    pub fn drain_events(&mut self) -> Vec<TerrainEvent> {
        self.events.drain()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::terrain_state::chunks::{Axis, ShiftDirection};
    use crate::terrain_state::pathfinding::PathFailure;
    use approx::assert_abs_diff_eq;

    const SURFACE: f32 = 4.0 + 0.5 / 0.7;

    /// Solid below y = 5, open cave above, over a 3 x 2 x 3 window of 8-sample chunks.
    fn floor_terrain() -> TerrainState {
        let config = TerrainConfig {
            chunk_size: 8,
            amount_chunks_horizontal: 3,
            amount_chunks_vertical: 2,
            boundary_thickness: 0.0,
            amount_decorations_per_chunk: 0,
            compute_threads: 2,
            ..TerrainConfig::default()
        };
        TerrainState::with_density_function(
            config,
            Arc::new(|world: Point3<f32>| if world.y < 5.0 { 0.0 } else { 0.7 }),
        )
        .unwrap()
    }

    fn center() -> Point3<f32> {
        Point3::new(10.5, 8.0, 10.5)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TerrainConfig {
            cave_scale: 0.0,
            ..TerrainConfig::default()
        };

        let result = TerrainState::new(config);

        assert!(matches!(result, Err(TerrainError::Config(_))));
    }

    #[test]
    fn first_tick_builds_the_flow_field() {
        let mut terrain = floor_terrain();

        let report = terrain.update(center());

        assert!(report.window_shift.is_none());
        assert!(report.observer.chunk_changed);
        let stats = report.flood_fill.unwrap();
        assert!(stats.visited > 0);
        assert!(!stats.exhausted);
    }

    #[test]
    fn standing_still_skips_regeneration() {
        let mut terrain = floor_terrain();
        terrain.update(center());

        let report = terrain.update(center() + Vector3::new(0.2, 0.1, 0.3));

        assert!(!report.observer.voxel_changed);
        assert!(report.flood_fill.is_none());
    }

    #[test]
    fn flow_points_toward_the_observer() {
        let mut terrain = floor_terrain();
        terrain.update(center());

        let direction = terrain.sample_flow_direction(Point3::new(14.2, 8.2, 10.2));
        let below_floor = terrain.sample_flow_direction(Point3::new(14.2, 2.0, 10.2));

        assert!(direction.x < 0.0);
        assert_abs_diff_eq!(cgmath::InnerSpace::magnitude(direction), 1.0, epsilon = 1e-5);
        assert_eq!(below_floor, Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn drifting_observer_slides_the_window() {
        let mut terrain = floor_terrain();
        terrain.update(center());

        let report = terrain.update(Point3::new(19.5, 8.0, 10.5));

        let shift = report.window_shift.unwrap();
        assert_eq!((shift.axis, shift.direction), (Axis::X, ShiftDirection::Positive));
        assert_eq!(terrain.grid().mapping().voxel_origin().x, 7);
        assert!(report.flood_fill.is_some());
        assert!(terrain.drain_events().contains(&TerrainEvent::ChunksShifted {
            axis: Axis::X,
            direction: ShiftDirection::Positive,
        }));
    }

    #[test]
    fn carving_the_floor_publishes_events_and_refreshes_navigation() {
        let mut terrain = floor_terrain();
        terrain.update(center());

        let (hit, regions) = terrain
            .carve_along_ray(Point3::new(10.3, 12.0, 10.6), -Vector3::unit_y(), 2.0, 2.0, true)
            .unwrap();

        assert_abs_diff_eq!(hit.position.y, SURFACE, epsilon = 1e-3);
        assert!(!regions.is_empty());
        let below = Ray::unbounded(Point3::new(10.3, 12.0, 10.6), -Vector3::unit_y()).unwrap();
        assert!(terrain.raycast(&below).unwrap().position.y < SURFACE - 0.5);

        let report = terrain.update(center());

        assert!(report.flood_fill.is_some());
        let events = terrain.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TerrainEvent::TerrainCarved { removal: true, .. }));
    }

    #[test]
    fn carving_outside_the_window_changes_nothing() {
        let mut terrain = floor_terrain();

        let regions = terrain.carve(Point3::new(-40.0, 5.0, -40.0), 2.0, 1.0, true);

        assert!(regions.is_empty());
        assert!(terrain.drain_events().is_empty());
    }

    #[test]
    fn resolve_sphere_lifts_a_sphere_out_of_the_floor() {
        let terrain = floor_terrain();

        let resolution = terrain.resolve_sphere(Point3::new(10.0, SURFACE + 0.4, 10.0), 1.0);

        assert!(resolution.resolved);
        assert!(resolution.position.y >= SURFACE + 1.0 - 1e-3);
    }

    #[test]
    fn path_results_arrive_during_updates() {
        let mut terrain = floor_terrain();
        let outcome: Rc<RefCell<Option<PathOutcome>>> = Rc::default();
        let sink = outcome.clone();
        let failure: Rc<RefCell<Option<PathOutcome>>> = Rc::default();
        let failure_sink = failure.clone();

        let goal = Point3::new(18.0, 8.0, 17.0);
        terrain.request_path(Point3::new(3.0, 8.0, 3.0), goal, move |result| {
            *sink.borrow_mut() = Some(result)
        });
        terrain.request_path(Point3::new(3.0, 2.0, 3.0), goal, move |result| {
            *failure_sink.borrow_mut() = Some(result)
        });

        for _ in 0..1000 {
            terrain.update(center());
            if terrain.pending_paths() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let outcome = outcome.take().unwrap();
        let path = outcome.unwrap();
        assert_eq!(path.first(), Some(&Point3::new(3, 8, 3)));
        let last = path.last().unwrap().map(|c| c as f32);
        assert!(cgmath::MetricSpace::distance(last, Point3::new(18.0, 8.0, 17.0)) < 2.0);
        assert_eq!(failure.take(), Some(Err(PathFailure::InvalidStart)));
        assert_eq!(terrain.delivered_paths(), 2);
    }

    #[test]
    fn regenerating_all_meshes_keeps_the_surface() {
        let mut terrain = floor_terrain();
        let before: usize = terrain
            .grid()
            .chunks()
            .iter()
            .map(|chunk| chunk.mesh().triangle_count())
            .sum();

        let total = terrain.regenerate_all_meshes();

        assert_eq!(total, before);
        assert!(total > 0);
    }
}
