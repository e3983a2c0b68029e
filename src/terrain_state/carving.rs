//! # Terrain Carving
//!
//! Spherical density edits. Removal raises density toward open air, filling
//! lowers it toward rock. The change falls off linearly from the sphere's centre
//! and removal can never lift a sample above the vertical band's cap, so the
//! floor and roof of the world stay closed.
//!
//! Every touched chunk is re-extracted before `carve` returns, and the edited
//! sub-regions are reported so navigation can patch its copy of the density
//! instead of rebuilding it.

use std::sync::Arc;

use cgmath::{EuclideanSpace, InnerSpace, Point3, Vector3};

use super::chunks::ChunkGrid;
use super::physics::{BroadPhase, CollisionLayer};

/// The block of one chunk's samples written by a carve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CarvedRegion {
    pub grid_index: Vector3<usize>,
    pub chunk_origin: Point3<i32>,
    /// First edited sample, chunk-local
    pub local_min: Point3<usize>,
    pub extent: Vector3<usize>,
}

impl CarvedRegion {
    /// World position of the first edited sample.
    pub fn world_min(&self) -> Point3<i32> {
        Point3::new(
            self.chunk_origin.x + self.local_min.x as i32,
            self.chunk_origin.y + self.local_min.y as i32,
            self.chunk_origin.z + self.local_min.z as i32,
        )
    }
}

/// Parameters of one spherical edit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CarveBrush {
    pub center: Point3<f32>,
    pub radius: f32,
    /// Density change at the centre
    pub rate: f32,
    /// `true` opens terrain, `false` fills it
    pub removal: bool,
}

impl CarveBrush {
    /// New density of a sample at `world` currently holding `value`, given the
    /// vertical band's `cap` at that height.
    pub fn apply(&self, world: Point3<f32>, value: f32, cap: f32) -> f32 {
        let distance = (world - self.center).magnitude();
        if distance >= self.radius {
            return value;
        }
        let delta = self.rate * (1.0 - distance / self.radius);

        if self.removal {
            (value + delta).min(cap.max(value)).min(1.0)
        } else {
            (value - delta).max(0.0)
        }
    }
}

#[derive(Debug, Default)]
pub struct TerrainCarver;

impl TerrainCarver {
    /// Applies `brush` to every chunk it overlaps and re-extracts them.
    ///
    /// # Returns
    /// The edited region of each chunk, empty when the brush lies outside the
    /// window or has no extent.
    pub fn carve(
        &self,
        grid: &mut ChunkGrid,
        broad_phase: &dyn BroadPhase,
        brush: CarveBrush,
    ) -> Vec<CarvedRegion> {
        if !(brush.radius > 0.0) || !brush.rate.is_finite() || brush.rate == 0.0 {
            return Vec::new();
        }

        let colliders = CollisionLayer::colliders(grid);
        let candidates = broad_phase.overlap_sphere(&colliders, brush.center, brush.radius);
        let compute = Arc::clone(grid.compute());
        let band = grid.band();
        let last = grid.step() as usize;

        let mut regions = Vec::with_capacity(candidates.len());
        for index in candidates {
            let Some(chunk) = grid.chunk(index) else {
                continue;
            };
            let origin = chunk.origin();
            let world_origin = chunk.world_origin();
            let local_center = brush.center - world_origin;

            let bound = |low: f32, high: f32| -> Option<(usize, usize)> {
                let min = low.floor().max(0.0);
                let max = high.ceil().min(last as f32);
                (min <= max).then(|| (min as usize, max as usize))
            };
            let (Some((x0, x1)), Some((y0, y1)), Some((z0, z1))) = (
                bound(local_center.x - brush.radius, local_center.x + brush.radius),
                bound(local_center.y - brush.radius, local_center.y + brush.radius),
                bound(local_center.z - brush.radius, local_center.z + brush.radius),
            ) else {
                continue;
            };
            let local_min = Point3::new(x0, y0, z0);
            let extent = Vector3::new(x1 - x0 + 1, y1 - y0 + 1, z1 - z0 + 1);

            let Some(density) = grid.chunk_density_mut(index) else {
                continue;
            };
            compute.dispatch_volume_mut(density, local_min, extent, |local, sample| {
                let world = world_origin + local.map(|c| c as f32).to_vec();
                *sample = brush.apply(world, *sample, band.cap(world.y));
            });
            let triangles = grid.reextract(index);

            log::debug!(
                "Carved chunk {:?}: {:?} + {:?}, {} triangles",
                index,
                local_min,
                extent,
                triangles
            );
            regions.push(CarvedRegion {
                grid_index: index,
                chunk_origin: origin,
                local_min,
                extent,
            });
        }
        regions
    }
}
