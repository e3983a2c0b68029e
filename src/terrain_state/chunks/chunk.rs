use std::sync::Arc;

use cgmath::{Point3, Vector3};

use crate::terrain_state::compute::ComputeContext;
use crate::terrain_state::density::{DensityGenerator, DensityVolume};
use crate::terrain_state::meshing::{IsosurfaceExtractor, TerrainMesh};
use crate::terrain_state::physics::intersection::{raycast_mesh_batch, Ray};

/// Length of the rays shot from a chunk's centre when placing decorations.
pub const DECORATION_RAY_LENGTH: f32 = 32.0;

/// An environment prop resting on the chunk's surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decoration {
    pub position: Point3<f32>,
    /// Surface normal the prop is aligned to
    pub normal: Vector3<f32>,
    pub placed: bool,
}

impl Default for Decoration {
    fn default() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 0.0),
            normal: Vector3::unit_y(),
            placed: false,
        }
    }
}

/// One streamed cube of terrain: its density samples, the mesh extracted from
/// them and the props placed on that mesh.
#[derive(Clone, Debug)]
pub struct Chunk {
    grid_index: Vector3<usize>,
    origin: Point3<i32>,
    density: Arc<DensityVolume>,
    mesh: TerrainMesh,
    decorations: Vec<Decoration>,
}

impl Chunk {
    pub fn grid_index(&self) -> Vector3<usize> {
        self.grid_index
    }

    pub(super) fn set_grid_index(&mut self, grid_index: Vector3<usize>) {
        self.grid_index = grid_index;
    }

    /// World position of the chunk's first sample.
    pub fn origin(&self) -> Point3<i32> {
        self.origin
    }

    pub fn world_origin(&self) -> Point3<f32> {
        self.origin.map(|c| c as f32)
    }

    pub fn density(&self) -> &DensityVolume {
        &self.density
    }

    /// Shared handle to the density, for snapshots read off the main thread.
    pub fn density_handle(&self) -> Arc<DensityVolume> {
        Arc::clone(&self.density)
    }

    /// Mutable density. Clones the samples first if a snapshot still holds them.
    pub(crate) fn density_mut(&mut self) -> &mut DensityVolume {
        Arc::make_mut(&mut self.density)
    }

    pub fn mesh(&self) -> &TerrainMesh {
        &self.mesh
    }

    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    /// World-space centre of the chunk.
    pub fn center(&self, step: i32) -> Point3<f32> {
        let half = step as f32 / 2.0;
        self.world_origin() + Vector3::new(half, half, half)
    }
}

/// Creates, recycles and re-meshes chunks.
///
/// Owned by the chunk grid so the grid's chunk storage and the builder's
/// scratch state can be borrowed independently.
pub struct ChunkBuilder {
    compute: Arc<ComputeContext>,
    generator: DensityGenerator,
    extractor: IsosurfaceExtractor,
    rng: fastrand::Rng,
    step: i32,
    decorations_per_chunk: usize,
    decoration_ray_attempts: usize,
}

impl ChunkBuilder {
    pub fn new(
        compute: Arc<ComputeContext>,
        generator: DensityGenerator,
        extractor: IsosurfaceExtractor,
        rng: fastrand::Rng,
        step: i32,
        decorations_per_chunk: usize,
        decoration_ray_attempts: usize,
    ) -> Self {
        Self {
            compute,
            generator,
            extractor,
            rng,
            step,
            decorations_per_chunk,
            decoration_ray_attempts,
        }
    }

    pub fn compute(&self) -> &Arc<ComputeContext> {
        &self.compute
    }

    pub fn generator(&self) -> &DensityGenerator {
        &self.generator
    }

    pub fn iso_level(&self) -> f32 {
        self.extractor.iso_level()
    }

    /// Generates, meshes and decorates a new chunk.
    pub fn build(&mut self, grid_index: Vector3<usize>, origin: Point3<i32>) -> Chunk {
        let density = self.generator.generate(&self.compute, origin);
        let mut chunk = Chunk {
            grid_index,
            origin,
            density: Arc::new(density),
            mesh: TerrainMesh::default(),
            decorations: vec![Decoration::default(); self.decorations_per_chunk],
        };
        self.reextract(&mut chunk);
        self.place_decorations(&mut chunk);
        chunk
    }

    /// Reuses `chunk` at a new origin: its storage, mesh buffers and decoration
    /// list are kept while the contents are regenerated.
    pub fn recycle(&mut self, chunk: &mut Chunk, origin: Point3<i32>) {
        chunk.origin = origin;
        self.generator
            .regenerate(&self.compute, Arc::make_mut(&mut chunk.density), origin);
        chunk.mesh.clear();
        self.reextract(chunk);
        self.place_decorations(chunk);
    }

    /// Re-runs extraction on the chunk's current density.
    pub fn reextract(&mut self, chunk: &mut Chunk) -> usize {
        self.extractor.extract(&chunk.density, &mut chunk.mesh)
    }

    /// Places each decoration at the first surface hit among a batch of random
    /// rays from the chunk's centre.
    pub fn place_decorations(&mut self, chunk: &mut Chunk) {
        if chunk.decorations.is_empty() {
            return;
        }

        let center = chunk.center(self.step);
        let world_origin = chunk.world_origin();
        for decoration in chunk.decorations.iter_mut() {
            let rays: Vec<Ray> = (0..self.decoration_ray_attempts)
                .filter_map(|_| {
                    let direction = Vector3::new(
                        self.rng.i32(-1..=0) as f32,
                        self.rng.i32(-1..=0) as f32,
                        self.rng.i32(-1..=0) as f32,
                    );
                    Ray::new(center, direction, DECORATION_RAY_LENGTH)
                })
                .collect();

            let hit = raycast_mesh_batch(&self.compute, &chunk.mesh, world_origin, &rays)
                .into_iter()
                .flatten()
                .next();

            match hit {
                Some(hit) => {
                    *decoration = Decoration {
                        position: hit.position,
                        normal: hit.normal,
                        placed: true,
                    };
                }
                None => log::warn!(
                    "Failed to place decoration in chunk at {:?} after {} rays",
                    chunk.origin,
                    rays.len()
                ),
            }
        }
    }
}
