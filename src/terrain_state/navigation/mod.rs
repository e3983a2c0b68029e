//! # Navigation Flow Field
//!
//! Keeps a direction field over the chunks around the observer that leads every
//! reachable open voxel toward the observer.
//!
//! ## Architecture
//! - `CombinedDensityVolume`: one volume holding the density of the `3 × V × 3`
//!   chunk block around the observer, reassembled when the observer changes
//!   chunk and patched in place after carves
//! - `FlowFieldGenerator`: ping-pong flood fill from the observer's voxel
//! - `FlowField`: the per-voxel parent directions, sampled by agents
//! - `NavigationGenerator`: decides when each of the above has to be rebuilt
//!
//! ## Performance Considerations
//! - The field is only regenerated when the observer's rounded voxel changes or
//!   the terrain inside the block was edited
//! - Each flood-fill iteration costs one readback, so the total grows with the
//!   longest path in the block rather than with its volume

use std::sync::Arc;

use cgmath::{Point3, Vector3};
use web_time::Instant;

mod combined;
mod flow_field;

pub use combined::{CombinedDensityVolume, BLOCK_WIDTH};
pub use flow_field::{FloodFillStats, FlowField, FlowFieldGenerator};

use super::carving::CarvedRegion;
use super::chunks::ChunkGrid;
use super::compute::ComputeContext;
use super::config::TerrainConfig;

/// Owns the combined density and flow field around the observer.
pub struct NavigationGenerator {
    combined: Option<CombinedDensityVolume>,
    field: FlowField,
    generator: FlowFieldGenerator,
    cached_voxel: Option<Point3<i32>>,
    cached_chunk: Option<Vector3<usize>>,
    terrain_changed: bool,
}

impl NavigationGenerator {
    pub fn new(compute: Arc<ComputeContext>, config: &TerrainConfig) -> Self {
        Self {
            combined: None,
            field: FlowField::default(),
            generator: FlowFieldGenerator::new(compute, config),
            cached_voxel: None,
            cached_chunk: None,
            terrain_changed: false,
        }
    }

    /// Brings the field up to date for an observer at `observer`.
    ///
    /// The combined volume is reassembled when the observer's chunk changed and
    /// the flood fill reruns when the rounded observer voxel changed or terrain
    /// was edited since the last run.
    ///
    /// # Returns
    /// - `Some(FloodFillStats)` when the field was regenerated
    /// - `None` when nothing changed or the observer is outside the window
    pub fn update(&mut self, grid: &ChunkGrid, observer: Point3<f32>) -> Option<FloodFillStats> {
        let chunk = grid.chunk_index_of(observer)?;
        let voxel = observer.map(|c| c.round() as i32);

        if self.cached_chunk != Some(chunk) || self.combined.is_none() {
            let started = Instant::now();
            match self.combined.as_mut() {
                Some(combined) => combined.reassemble(grid, chunk),
                None => self.combined = Some(CombinedDensityVolume::assemble(grid, chunk)),
            }
            self.cached_chunk = Some(chunk);
            self.terrain_changed = true;
            log::info!(
                "Assembled navigation volume around chunk {:?} in {:?}",
                chunk,
                started.elapsed()
            );
        }

        if self.cached_voxel == Some(voxel) && !self.terrain_changed {
            return None;
        }
        self.cached_voxel = Some(voxel);
        self.terrain_changed = false;

        let combined = self.combined.as_ref()?;
        Some(self.generator.regenerate(&mut self.field, combined, observer))
    }

    /// Copies carved regions into the combined volume and marks the field stale.
    ///
    /// Regions whose chunk was recycled since the carve force a reassembly on
    /// the next update instead.
    pub fn patch(&mut self, grid: &ChunkGrid, regions: &[CarvedRegion]) {
        let Some(combined) = self.combined.as_mut() else {
            return;
        };
        for region in regions {
            let inside_block = {
                let first = combined.first_chunk();
                let extent = combined.chunk_extent();
                (0..3).all(|axis| {
                    region.grid_index[axis] >= first[axis]
                        && region.grid_index[axis] < first[axis] + extent[axis]
                })
            };
            if !inside_block {
                continue;
            }
            if !combined.patch(grid, region) {
                self.cached_chunk = None;
            }
        }
        self.terrain_changed = true;
    }

    /// Forgets the assembled block; used after the chunk window slid.
    pub fn invalidate(&mut self) {
        self.cached_chunk = None;
    }

    /// Movement direction at `world`, zero where the field has none.
    pub fn sample(&self, world: Point3<f32>) -> Vector3<f32> {
        self.field.sample(world)
    }

    pub fn field(&self) -> &FlowField {
        &self.field
    }

    pub fn combined(&self) -> Option<&CombinedDensityVolume> {
        self.combined.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_state::carving::{CarveBrush, TerrainCarver};
    use crate::terrain_state::density::{DensityGenerator, VerticalBand};
    use crate::terrain_state::physics::ChunkBoundsBroadPhase;

    /// Open air above y = 1 split by a solid slab at z = 6. Fully carved air
    /// still counts as open.
    fn grid() -> (TerrainConfig, ChunkGrid) {
        let config = TerrainConfig {
            chunk_size: 8,
            amount_chunks_horizontal: 3,
            amount_chunks_vertical: 2,
            boundary_thickness: 0.0,
            amount_decorations_per_chunk: 0,
            open_margin: 0.6,
            ..TerrainConfig::default()
        };
        let generator = DensityGenerator::new(
            Arc::new(|world: Point3<f32>| {
                let slab = world.z > 5.0 && world.z < 7.0;
                if world.y < 1.0 || slab {
                    0.1
                } else {
                    0.7
                }
            }),
            VerticalBand::from_config(&config),
            config.effective_chunk_size(),
        );
        let grid = ChunkGrid::new(&config, Arc::new(ComputeContext::new(2).unwrap()), generator);
        (config, grid)
    }

    fn navigation(config: &TerrainConfig) -> NavigationGenerator {
        NavigationGenerator::new(Arc::new(ComputeContext::new(2).unwrap()), config)
    }

    #[test]
    fn field_regenerates_only_when_the_observer_voxel_changes() {
        let (config, grid) = grid();
        let mut navigation = navigation(&config);

        assert!(navigation.update(&grid, Point3::new(10.2, 4.1, 10.0)).is_some());
        assert!(navigation.update(&grid, Point3::new(10.3, 3.9, 10.1)).is_none());
        assert!(navigation.update(&grid, Point3::new(11.2, 4.1, 10.0)).is_some());
    }

    #[test]
    fn observer_outside_the_window_leaves_the_field_alone() {
        let (config, grid) = grid();
        let mut navigation = navigation(&config);

        assert!(navigation.update(&grid, Point3::new(-40.0, 4.0, 10.0)).is_none());
        assert!(navigation.combined().is_none());
        assert_eq!(navigation.sample(Point3::new(10.0, 4.0, 10.0)), Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn carving_through_a_wall_opens_new_routes() {
        let (config, mut grid) = grid();
        let mut navigation = navigation(&config);
        let observer = Point3::new(10.0, 3.0, 10.0);

        let before = navigation.update(&grid, observer).unwrap();
        let behind_slab = Point3::new(10, 3, 3);
        assert!(!navigation.field().is_visited(behind_slab));

        let brush = CarveBrush {
            center: Point3::new(10.0, 3.0, 6.0),
            radius: 2.5,
            rate: 0.7,
            removal: true,
        };
        let regions = TerrainCarver.carve(&mut grid, &ChunkBoundsBroadPhase, brush);
        navigation.patch(&grid, &regions);
        let after = navigation.update(&grid, observer).unwrap();

        assert!(after.visited > before.visited);
        assert!(navigation.field().is_visited(behind_slab));
        let combined = navigation.combined().unwrap();
        assert_eq!(
            *combined,
            CombinedDensityVolume::assemble(&grid, grid.chunk_index_of(observer).unwrap())
        );
    }
}
