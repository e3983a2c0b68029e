//! The navigation copy of the density around the observer.

use cgmath::{Point3, Vector3};

use crate::terrain_state::carving::CarvedRegion;
use crate::terrain_state::chunks::ChunkGrid;
use crate::terrain_state::density::{DensitySource, DensityVolume};

/// Chunks per horizontal axis in the block around the observer's chunk.
pub const BLOCK_WIDTH: usize = 3;

/// Density of a `3 × vertical × 3` block of chunks, copied into one volume so
/// the flood fill never resolves chunk boundaries.
///
/// The block is centred on the observer's chunk where the window allows and
/// always spans the full window height.
#[derive(Clone, Debug, PartialEq)]
pub struct CombinedDensityVolume {
    origin: Point3<i32>,
    first_chunk: Vector3<usize>,
    chunk_extent: Vector3<usize>,
    volume: DensityVolume,
}

impl CombinedDensityVolume {
    /// First chunk index and chunk count of the block around `center`.
    pub fn block_around(
        grid: &ChunkGrid,
        center: Vector3<usize>,
    ) -> (Vector3<usize>, Vector3<usize>) {
        let dimensions = grid.dimensions();
        let horizontal = |center: usize, extent: usize| {
            let count = extent.min(BLOCK_WIDTH);
            (center.saturating_sub(1).min(extent - count), count)
        };
        let (x, width) = horizontal(center.x, dimensions.x);
        let (z, depth) = horizontal(center.z, dimensions.z);
        (Vector3::new(x, 0, z), Vector3::new(width, dimensions.y, depth))
    }

    /// Copies the block around `center` out of `grid`.
    pub fn assemble(grid: &ChunkGrid, center: Vector3<usize>) -> Self {
        let mut combined = Self {
            origin: Point3::new(0, 0, 0),
            first_chunk: Vector3::new(0, 0, 0),
            chunk_extent: Vector3::new(0, 0, 0),
            volume: DensityVolume::filled(Vector3::new(0, 0, 0), 0.0),
        };
        combined.reassemble(grid, center);
        combined
    }

    /// Re-copies the block around `center`, reusing the sample storage when the
    /// block size is unchanged.
    pub fn reassemble(&mut self, grid: &ChunkGrid, center: Vector3<usize>) {
        let (first_chunk, chunk_extent) = Self::block_around(grid, center);
        let step = grid.step() as usize;
        let dimensions = chunk_extent.map(|count| count * step + 1);

        if self.volume.dimensions() != dimensions {
            self.volume = DensityVolume::filled(dimensions, 0.0);
        }
        self.first_chunk = first_chunk;
        self.chunk_extent = chunk_extent;
        self.origin = grid.mapping().chunk_origin(first_chunk);

        for k in 0..chunk_extent.z {
            for j in 0..chunk_extent.y {
                for i in 0..chunk_extent.x {
                    let Some(chunk) = grid.chunk(first_chunk + Vector3::new(i, j, k)) else {
                        continue;
                    };
                    let density = chunk.density();
                    self.volume.copy_region_from(
                        density,
                        Point3::new(0, 0, 0),
                        Point3::new(i * step, j * step, k * step),
                        density.dimensions(),
                    );
                }
            }
        }
    }

    /// Copies a carved region back out of the grid.
    ///
    /// # Returns
    /// `false` when the region's chunk has since been recycled or lies outside
    /// the block; the caller then has to reassemble.
    pub fn patch(&mut self, grid: &ChunkGrid, region: &CarvedRegion) -> bool {
        let Some(chunk) = grid.chunk(region.grid_index) else {
            return false;
        };
        if chunk.origin() != region.chunk_origin {
            return false;
        }

        let offset = region.chunk_origin - self.origin;
        if !self.volume.contains(Point3::new(offset.x, offset.y, offset.z)) {
            return false;
        }
        let target_min = Point3::new(
            offset.x as usize + region.local_min.x,
            offset.y as usize + region.local_min.y,
            offset.z as usize + region.local_min.z,
        );
        self.volume
            .copy_region_from(chunk.density(), region.local_min, target_min, region.extent);
        true
    }

    /// World voxel of local sample `(0, 0, 0)`.
    pub fn origin(&self) -> Point3<i32> {
        self.origin
    }

    pub fn dimensions(&self) -> Vector3<usize> {
        self.volume.dimensions()
    }

    pub fn volume(&self) -> &DensityVolume {
        &self.volume
    }

    pub fn first_chunk(&self) -> Vector3<usize> {
        self.first_chunk
    }

    pub fn chunk_extent(&self) -> Vector3<usize> {
        self.chunk_extent
    }
}

impl DensitySource for CombinedDensityVolume {
    fn density_at_voxel(&self, voxel: Point3<i32>) -> Option<f32> {
        let local = voxel - self.origin;
        self.volume.try_get(Point3::new(local.x, local.y, local.z))
    }

    fn voxel_bounds(&self) -> (Point3<i32>, Point3<i32>) {
        let dimensions = self.volume.dimensions();
        let max = self.origin
            + Vector3::new(
                dimensions.x as i32 - 1,
                dimensions.y as i32 - 1,
                dimensions.z as i32 - 1,
            );
        (self.origin, max)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::terrain_state::carving::{CarveBrush, TerrainCarver};
    use crate::terrain_state::compute::ComputeContext;
    use crate::terrain_state::config::TerrainConfig;
    use crate::terrain_state::density::{DensityGenerator, VerticalBand};
    use crate::terrain_state::physics::ChunkBoundsBroadPhase;

    fn grid(horizontal: usize) -> ChunkGrid {
        let config = TerrainConfig {
            chunk_size: 8,
            amount_chunks_horizontal: horizontal,
            amount_chunks_vertical: 2,
            boundary_thickness: 0.0,
            amount_decorations_per_chunk: 0,
            ..TerrainConfig::default()
        };
        let generator = DensityGenerator::new(
            Arc::new(|world: Point3<f32>| {
                ((world.x * 0.37 + world.y * 0.11 + world.z * 0.23).sin() + 1.0) * 0.5
            }),
            VerticalBand::from_config(&config),
            config.effective_chunk_size(),
        );
        ChunkGrid::new(&config, Arc::new(ComputeContext::new(2).unwrap()), generator)
    }

    fn assert_matches_grid(combined: &CombinedDensityVolume, grid: &ChunkGrid) {
        let (min, max) = combined.voxel_bounds();
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    let voxel = Point3::new(x, y, z);
                    assert_eq!(combined.density_at_voxel(voxel), grid.density_at_voxel(voxel));
                }
            }
        }
    }

    #[test]
    fn block_is_centred_and_clamped_to_the_window() {
        let grid = grid(5);

        assert_eq!(
            CombinedDensityVolume::block_around(&grid, Vector3::new(2, 1, 2)),
            (Vector3::new(1, 0, 1), Vector3::new(3, 2, 3))
        );
        assert_eq!(
            CombinedDensityVolume::block_around(&grid, Vector3::new(0, 0, 4)),
            (Vector3::new(0, 0, 2), Vector3::new(3, 2, 3))
        );
    }

    #[test]
    fn assembled_volume_mirrors_grid_density() {
        let grid = grid(5);

        let combined = CombinedDensityVolume::assemble(&grid, Vector3::new(2, 0, 2));

        assert_eq!(combined.dimensions(), Vector3::new(22, 15, 22));
        assert_eq!(combined.origin(), grid.mapping().chunk_origin(Vector3::new(1, 0, 1)));
        assert_matches_grid(&combined, &grid);
    }

    #[test]
    fn patching_carved_regions_matches_a_full_reassembly() {
        let mut grid = grid(3);
        let mut combined = CombinedDensityVolume::assemble(&grid, Vector3::new(1, 0, 1));

        let regions = TerrainCarver.carve(
            &mut grid,
            &ChunkBoundsBroadPhase,
            CarveBrush {
                center: Point3::new(7.0, 6.5, 7.0),
                radius: 3.0,
                rate: 0.4,
                removal: true,
            },
        );
        assert!(!regions.is_empty());
        for region in &regions {
            assert!(combined.patch(&grid, region));
        }

        assert_eq!(combined, CombinedDensityVolume::assemble(&grid, Vector3::new(1, 0, 1)));
    }

    #[test]
    fn patch_rejects_recycled_chunks() {
        let mut grid = grid(3);
        let mut combined = CombinedDensityVolume::assemble(&grid, Vector3::new(1, 0, 1));
        let stale = CarvedRegion {
            grid_index: Vector3::new(1, 0, 1),
            chunk_origin: Point3::new(-70, 0, 7),
            local_min: Point3::new(0, 0, 0),
            extent: Vector3::new(2, 2, 2),
        };

        assert!(!combined.patch(&grid, &stale));
    }
}
