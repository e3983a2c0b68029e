//! # Chunk Grid Management
//!
//! Owns every live chunk in a fixed `horizontal × vertical × horizontal` window
//! around the observer and keeps the window moving as the observer travels.
//!
//! ## Architecture
//! - `GridMapping`: world ↔ grid coordinate conversions and the grid's bounds
//! - `ChunkGrid`: chunk storage, the sliding window and voxel-level density reads
//! - `ChunkBuilder`: generation, re-extraction and decoration of single chunks
//! - `DensitySnapshot`: an immutable copy of the grid's density for background
//!   readers
//!
//! ## Sliding Window
//! When the observer's fractional chunk index drifts more than one chunk from the
//! window centre on a horizontal axis, the whole window moves one step that way.
//! The chunks in each line along that axis are rotated in place; the chunk that
//! falls off the trailing edge is recycled at the leading edge with its storage
//! reused. One axis is corrected per call, so a diagonal crossing settles over
//! two consecutive calls.
//!
//! ## Performance Considerations
//! - All chunks are generated eagerly at start-up; afterwards only recycled chunks
//!   are regenerated
//! - Snapshots share density storage with the grid; a chunk only copies its
//!   samples when it is edited while a snapshot still holds them

use std::sync::Arc;

use cgmath::{Point3, Vector3};
use web_time::Instant;

mod chunk;
mod mapping;

pub use chunk::{Chunk, ChunkBuilder, Decoration, DECORATION_RAY_LENGTH};
pub use mapping::{Axis, GridMapping, ShiftDirection};

use super::compute::ComputeContext;
use super::config::TerrainConfig;
use super::density::{DensityGenerator, DensitySource, DensityVolume, VerticalBand};
use super::meshing::IsosurfaceExtractor;

/// A completed window slide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowShift {
    pub axis: Axis,
    pub direction: ShiftDirection,
    /// Number of chunks regenerated at the leading edge
    pub recycled: usize,
}

/// The sliding window of live chunks.
pub struct ChunkGrid {
    mapping: GridMapping,
    chunks: Vec<Chunk>,
    builder: ChunkBuilder,
}

impl ChunkGrid {
    /// Generates and meshes every chunk of the initial window.
    pub fn new(
        config: &TerrainConfig,
        compute: Arc<ComputeContext>,
        generator: DensityGenerator,
    ) -> Self {
        let started = Instant::now();
        let mapping = GridMapping::new(
            config.world_origin(),
            config.grid_dimensions(),
            config.chunk_step(),
        );
        let extractor = IsosurfaceExtractor::new(Arc::clone(&compute), config.iso_level);
        let mut builder = ChunkBuilder::new(
            compute,
            generator,
            extractor,
            fastrand::Rng::with_seed(config.decoration_seed),
            mapping.step(),
            config.amount_decorations_per_chunk,
            config.decoration_ray_attempts,
        );

        let chunks = (0..mapping.chunk_count())
            .map(|flat| {
                let index = mapping.grid_index(flat);
                builder.build(index, mapping.chunk_origin(index))
            })
            .collect::<Vec<_>>();

        log::info!(
            "Generated {} chunks ({}x{}x{}) in {:?}",
            chunks.len(),
            mapping.dimensions().x,
            mapping.dimensions().y,
            mapping.dimensions().z,
            started.elapsed()
        );

        Self {
            mapping,
            chunks,
            builder,
        }
    }

    pub fn mapping(&self) -> &GridMapping {
        &self.mapping
    }

    pub fn dimensions(&self) -> Vector3<usize> {
        self.mapping.dimensions()
    }

    pub fn step(&self) -> i32 {
        self.mapping.step()
    }

    pub fn iso_level(&self) -> f32 {
        self.builder.iso_level()
    }

    pub fn compute(&self) -> &Arc<ComputeContext> {
        self.builder.compute()
    }

    /// The solid floor and roof the generator seals the world with.
    pub fn band(&self) -> VerticalBand {
        *self.builder.generator().band()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, index: Vector3<usize>) -> Option<&Chunk> {
        self.in_range(index)
            .then(|| &self.chunks[self.mapping.flat_index(index)])
    }

    pub fn chunk_index_of(&self, world: Point3<f32>) -> Option<Vector3<usize>> {
        self.mapping.chunk_index_of(world)
    }

    /// The chunk containing `world`, or `None` outside the window.
    pub fn chunk_at(&self, world: Point3<f32>) -> Option<&Chunk> {
        self.chunk_index_of(world).and_then(|index| self.chunk(index))
    }

    /// Moves the window one step toward `observer` if it has drifted more than
    /// one chunk from the centre on a horizontal axis.
    ///
    /// # Returns
    /// - `Some(WindowShift)` describing the slide performed
    /// - `None` if the observer is within the margin on both axes
    pub fn slide_window(&mut self, observer: Point3<f32>) -> Option<WindowShift> {
        let fractional = self.mapping.fractional_index(observer);
        let dimensions = self.dimensions();

        for (axis, position, extent) in [
            (Axis::X, fractional.x, dimensions.x),
            (Axis::Z, fractional.z, dimensions.z),
        ] {
            let center = extent as f32 / 2.0;
            if (position - center).abs() > 1.0 {
                let direction = if position < center {
                    ShiftDirection::Negative
                } else {
                    ShiftDirection::Positive
                };
                return Some(self.shift(axis, direction));
            }
        }
        None
    }

    /// Moves the window one step along `axis`, recycling the trailing layer of
    /// chunks at the leading edge.
    pub fn shift(&mut self, axis: Axis, direction: ShiftDirection) -> WindowShift {
        let started = Instant::now();
        self.mapping.shift(axis, direction);

        let dimensions = self.dimensions();
        let a = axis.index();
        let length = dimensions[a];
        let (u, v) = match axis {
            Axis::X => (1, 2),
            Axis::Y => (0, 2),
            Axis::Z => (0, 1),
        };

        let mut recycled = 0;
        for i in 0..dimensions[u] {
            for j in 0..dimensions[v] {
                let slot = |position: usize| {
                    let mut index = Vector3::new(0, 0, 0);
                    index[a] = position;
                    index[u] = i;
                    index[v] = j;
                    index
                };

                // Rotate the line so the trailing chunk ends up at the leading slot.
                match direction {
                    ShiftDirection::Positive => {
                        for position in 0..length.saturating_sub(1) {
                            self.swap_slots(slot(position), slot(position + 1));
                        }
                    }
                    ShiftDirection::Negative => {
                        for position in (1..length).rev() {
                            self.swap_slots(slot(position), slot(position - 1));
                        }
                    }
                }

                let leading = match direction {
                    ShiftDirection::Positive => slot(length - 1),
                    ShiftDirection::Negative => slot(0),
                };
                let origin = self.mapping.chunk_origin(leading);
                let flat = self.mapping.flat_index(leading);
                self.builder.recycle(&mut self.chunks[flat], origin);
                recycled += 1;
            }
        }

        log::info!(
            "Shifted chunk window {:?} along {:?}, recycled {} chunks in {:?}",
            direction,
            axis,
            recycled,
            started.elapsed()
        );

        WindowShift {
            axis,
            direction,
            recycled,
        }
    }

    /// Re-runs extraction for one chunk after its density changed.
    pub fn reextract(&mut self, index: Vector3<usize>) -> usize {
        if !self.in_range(index) {
            return 0;
        }
        let flat = self.mapping.flat_index(index);
        self.builder.reextract(&mut self.chunks[flat])
    }

    /// Re-extracts every chunk, returning the total triangle count.
    pub fn regenerate_all_meshes(&mut self) -> usize {
        let started = Instant::now();
        let total: usize = self
            .chunks
            .iter_mut()
            .map(|chunk| self.builder.reextract(chunk))
            .sum();
        log::info!("Rebuilt all chunk meshes ({total} triangles) in {:?}", started.elapsed());
        total
    }

    /// Mutable density of one chunk. Callers must re-extract before the mesh is
    /// read again.
    pub(crate) fn chunk_density_mut(
        &mut self,
        index: Vector3<usize>,
    ) -> Option<&mut DensityVolume> {
        if !self.in_range(index) {
            return None;
        }
        let flat = self.mapping.flat_index(index);
        Some(self.chunks[flat].density_mut())
    }

    /// An immutable view of the current density for readers off the main thread.
    pub fn snapshot(&self) -> DensitySnapshot {
        DensitySnapshot {
            mapping: self.mapping,
            volumes: self.chunks.iter().map(Chunk::density_handle).collect(),
        }
    }

    fn in_range(&self, index: Vector3<usize>) -> bool {
        let dimensions = self.dimensions();
        index.x < dimensions.x && index.y < dimensions.y && index.z < dimensions.z
    }

    fn swap_slots(&mut self, a: Vector3<usize>, b: Vector3<usize>) {
        let (flat_a, flat_b) = (self.mapping.flat_index(a), self.mapping.flat_index(b));
        self.chunks.swap(flat_a, flat_b);
        self.chunks[flat_a].set_grid_index(a);
        self.chunks[flat_b].set_grid_index(b);
    }
}

impl DensitySource for ChunkGrid {
    fn density_at_voxel(&self, voxel: Point3<i32>) -> Option<f32> {
        let (index, local) = self.mapping.resolve_voxel(voxel)?;
        Some(self.chunks[self.mapping.flat_index(index)].density().get(local))
    }

    fn voxel_bounds(&self) -> (Point3<i32>, Point3<i32>) {
        (self.mapping.voxel_origin(), self.mapping.voxel_max())
    }
}

/// Density of the whole window at one point in time.
#[derive(Clone, Debug)]
pub struct DensitySnapshot {
    mapping: GridMapping,
    volumes: Vec<Arc<DensityVolume>>,
}

impl DensitySnapshot {
    pub fn mapping(&self) -> &GridMapping {
        &self.mapping
    }
}

impl DensitySource for DensitySnapshot {
    fn density_at_voxel(&self, voxel: Point3<i32>) -> Option<f32> {
        let (index, local) = self.mapping.resolve_voxel(voxel)?;
        Some(self.volumes[self.mapping.flat_index(index)].get(local))
    }

    fn voxel_bounds(&self) -> (Point3<i32>, Point3<i32>) {
        (self.mapping.voxel_origin(), self.mapping.voxel_max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn config() -> TerrainConfig {
        TerrainConfig {
            chunk_size: 8,
            amount_chunks_horizontal: 5,
            amount_chunks_vertical: 2,
            boundary_thickness: 0.0,
            amount_decorations_per_chunk: 1,
            ..TerrainConfig::default()
        }
    }

    /// Solid floor below y = 2, open cave above.
    fn grid_with(config: &TerrainConfig) -> ChunkGrid {
        let compute = Arc::new(ComputeContext::new(2).unwrap());
        let generator = DensityGenerator::new(
            Arc::new(|world: Point3<f32>| if world.y < 2.0 { 0.1 } else { 0.7 }),
            VerticalBand::from_config(config),
            config.effective_chunk_size(),
        );
        ChunkGrid::new(config, compute, generator)
    }

    fn assert_bounds_invariant(grid: &ChunkGrid) {
        let extent = grid.mapping().bounds_max() - grid.mapping().bounds_min();
        let dimensions = grid.dimensions();
        let step = grid.step() as f32;
        assert_abs_diff_eq!(extent.x, dimensions.x as f32 * step);
        assert_abs_diff_eq!(extent.y, dimensions.y as f32 * step);
        assert_abs_diff_eq!(extent.z, dimensions.z as f32 * step);
    }

    fn assert_chunks_match_slots(grid: &ChunkGrid) {
        for (flat, chunk) in grid.chunks().iter().enumerate() {
            let index = grid.mapping().grid_index(flat);
            assert_eq!(chunk.grid_index(), index);
            assert_eq!(chunk.origin(), grid.mapping().chunk_origin(index));
        }
    }

    #[test]
    fn initialization_generates_every_chunk() {
        let config = config();
        let grid = grid_with(&config);

        assert_eq!(grid.chunks().len(), 50);
        assert_chunks_match_slots(&grid);
        assert_bounds_invariant(&grid);
        let floor = grid.chunk(Vector3::new(2, 0, 2)).unwrap();
        assert!(!floor.mesh().is_empty());
        assert!(floor.decorations()[0].placed);
    }

    #[test]
    fn observer_near_center_does_not_slide() {
        let mut grid = grid_with(&config());
        let center = grid.chunk(Vector3::new(2, 0, 2)).unwrap().center(grid.step());

        assert_eq!(grid.slide_window(center), None);
    }

    #[test]
    fn slide_right_then_left_restores_bounds() {
        let mut grid = grid_with(&config());
        let original = *grid.mapping();
        let step = grid.step() as f32;
        let min = original.bounds_min();

        // Fractional x of 4.2 lies more than one chunk right of the centre (2.5).
        let right = grid
            .slide_window(Point3::new(min.x + 4.2 * step, 6.0, min.z + 2.5 * step))
            .unwrap();
        assert_eq!(right.axis, Axis::X);
        assert_eq!(right.direction, ShiftDirection::Positive);
        assert_eq!(right.recycled, 10);
        assert_bounds_invariant(&grid);
        assert_chunks_match_slots(&grid);

        let left = grid.shift(Axis::X, ShiftDirection::Negative);
        assert_eq!(left.recycled, 10);
        assert_eq!(*grid.mapping(), original);
        assert_bounds_invariant(&grid);
        assert_chunks_match_slots(&grid);
    }

    #[test]
    fn interior_chunks_move_without_regeneration() {
        let mut grid = grid_with(&config());
        let moved = grid.chunk(Vector3::new(1, 0, 3)).unwrap().density_handle();

        grid.shift(Axis::X, ShiftDirection::Positive);

        let now = grid.chunk(Vector3::new(0, 0, 3)).unwrap().density_handle();
        assert!(Arc::ptr_eq(&moved, &now));
    }

    #[test]
    fn diagonal_crossing_corrects_one_axis_per_call() {
        let mut grid = grid_with(&config());
        let step = grid.step() as f32;
        let min = grid.mapping().bounds_min();
        let observer = Point3::new(min.x + 0.5 * step, 6.0, min.z + 4.5 * step);

        let first = grid.slide_window(observer).unwrap();
        assert_eq!((first.axis, first.direction), (Axis::X, ShiftDirection::Negative));

        let second = grid.slide_window(observer).unwrap();
        assert_eq!((second.axis, second.direction), (Axis::Z, ShiftDirection::Positive));

        assert_eq!(grid.slide_window(observer), None);
        assert_bounds_invariant(&grid);
    }

    #[test]
    fn voxel_reads_resolve_across_chunk_boundaries() {
        let grid = grid_with(&config());
        let origin = grid.mapping().voxel_origin();
        let step = grid.step();

        let below = Point3::new(origin.x + step, 1, origin.z + step);
        let above = Point3::new(origin.x + step + 1, step + 2, origin.z + step - 1);

        assert_abs_diff_eq!(grid.density_at_voxel(below).unwrap(), 0.1);
        assert_abs_diff_eq!(grid.density_at_voxel(above).unwrap(), 0.7);
        assert!(grid.density_at_voxel(Point3::new(origin.x - 1, 2, origin.z)).is_none());

        let around = grid.neighbourhood(below);
        assert!(around.iter().all(Option::is_some));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_edits() {
        let mut grid = grid_with(&config());
        let snapshot = grid.snapshot();
        let voxel = grid.mapping().chunk_origin(Vector3::new(0, 0, 0)) + Vector3::new(1, 1, 1);

        grid.chunk_density_mut(Vector3::new(0, 0, 0))
            .unwrap()
            .set(Point3::new(1, 1, 1), 0.95);

        assert_abs_diff_eq!(grid.density_at_voxel(voxel).unwrap(), 0.95);
        assert_abs_diff_eq!(snapshot.density_at_voxel(voxel).unwrap(), 0.1);
    }
}
