//! # Collision Layer
//!
//! Surface raycasts and sphere queries against the live chunk meshes. Queries
//! only read chunk state; they never trigger extraction or mutate density.
//!
//! ## Architecture
//! - `BroadPhase`: chunk-level shortlisting (sphere overlap, boundary crossing)
//! - `intersection`: per-triangle ray and sphere passes over one chunk mesh
//! - `CollisionLayer`: walks rays chunk by chunk and picks the deepest sphere
//!   contact
//!
//! Out-of-window queries are expected while streaming and report "no hit".

use cgmath::{InnerSpace, Point3, Vector3};

pub mod broad_phase;
pub mod intersection;

pub use broad_phase::{BroadPhase, ChunkBoundsBroadPhase, ChunkCollider};
pub use intersection::{Ray, RayHit, SurfaceContact};

use super::chunks::ChunkGrid;
use super::density::DensitySource;
use intersection::{raycast_mesh, raycast_mesh_batch, sphere_contact};

/// How far past a chunk boundary a ray is advanced before the next lookup.
const BOUNDARY_NUDGE: f32 = 0.1;

/// Step used when marching out of solid density.
const BURIED_MARCH_STEP: f32 = 0.5;

/// Bisection rounds refining where a march leaves solid density.
const BURIED_REFINE_STEPS: usize = 12;

/// Outcome of a sphere query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereQueryResult {
    pub hit: bool,
    /// Push-out that separates the sphere from the deepest touched surface
    pub displacement: Vector3<f32>,
}

impl SphereQueryResult {
    pub fn miss() -> Self {
        Self {
            hit: false,
            displacement: Vector3::new(0.0, 0.0, 0.0),
        }
    }
}

/// Outcome of resolving a sphere out of the terrain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereResolution {
    pub position: Point3<f32>,
    /// Number of displacement steps applied
    pub iterations: usize,
    /// Whether the sphere ended free of contacts
    pub resolved: bool,
}

/// Ray and sphere queries over a [`ChunkGrid`].
pub struct CollisionLayer {
    broad_phase: Box<dyn BroadPhase>,
    raycast_chunk_limit: usize,
}

impl CollisionLayer {
    pub fn new(broad_phase: Box<dyn BroadPhase>, raycast_chunk_limit: usize) -> Self {
        Self {
            broad_phase,
            raycast_chunk_limit,
        }
    }

    pub fn colliders(grid: &ChunkGrid) -> Vec<ChunkCollider> {
        grid.chunks()
            .iter()
            .map(|chunk| ChunkCollider::from_chunk(chunk, grid.step()))
            .collect()
    }

    /// Casts `ray` through the grid and returns the first surface hit.
    ///
    /// The ray is tested against the chunk containing its current point; on a
    /// miss the point advances just past the next chunk boundary. At most
    /// `raycast_chunk_limit` chunks are visited.
    pub fn raycast(&self, grid: &ChunkGrid, ray: &Ray) -> Option<RayHit> {
        let colliders = Self::colliders(grid);
        let compute = grid.compute();
        let mut travelled = 0.0;

        for _ in 0..self.raycast_chunk_limit {
            let point = ray.at(travelled);
            if let Some(chunk) = grid.chunk_at(point) {
                // Test with the original origin so hits between the boundary and
                // the nudged point are not skipped.
                if let Some(hit) = raycast_mesh(compute, chunk.mesh(), chunk.world_origin(), ray) {
                    return Some(hit);
                }
            }

            let remaining = Ray {
                origin: point,
                direction: ray.direction,
                max_distance: ray.max_distance - travelled,
            };
            let boundary = self.broad_phase.next_boundary(&colliders, &remaining)?;
            travelled += boundary + BOUNDARY_NUDGE;
            if travelled > ray.max_distance {
                return None;
            }
        }
        None
    }

    /// Casts many rays against the mesh of the single chunk at `chunk_index`
    /// in one pass, returning the nearest hit per ray.
    pub fn raycast_batch(
        &self,
        grid: &ChunkGrid,
        chunk_index: Vector3<usize>,
        rays: &[Ray],
    ) -> Vec<Option<RayHit>> {
        match grid.chunk(chunk_index) {
            Some(chunk) => {
                raycast_mesh_batch(grid.compute(), chunk.mesh(), chunk.world_origin(), rays)
            }
            None => vec![None; rays.len()],
        }
    }

    /// Tests a sphere against every chunk it overlaps.
    ///
    /// Chunks sharing a boundary layer each report a closest point, so only the
    /// deepest contact across all of them pushes the sphere. When the centre is
    /// on the open side of the surface the push-out is `(center - closest)`
    /// scaled to the penetration depth; when the centre has sunk below the
    /// surface the push follows the face normal far enough to clear it. A
    /// sphere buried too deep to touch any triangle is pushed out along the
    /// shortest route to open density.
    pub fn sphere_query(
        &self,
        grid: &ChunkGrid,
        center: Point3<f32>,
        radius: f32,
    ) -> SphereQueryResult {
        if !(radius > 0.0) {
            return SphereQueryResult::miss();
        }

        let colliders = Self::colliders(grid);
        let candidates = self.broad_phase.overlap_sphere(&colliders, center, radius);

        let deepest = candidates
            .into_iter()
            .filter_map(|index| grid.chunk(index))
            .filter_map(|chunk| {
                sphere_contact(grid.compute(), chunk.mesh(), chunk.world_origin(), center, radius)
            })
            .map(|contact| push_out(&contact, center, radius))
            .max_by(|a, b| a.magnitude2().total_cmp(&b.magnitude2()));

        if let Some(displacement) = deepest {
            return SphereQueryResult {
                hit: true,
                displacement,
            };
        }

        match buried_push_out(grid, center, radius) {
            Some(displacement) => SphereQueryResult {
                hit: true,
                displacement,
            },
            None => SphereQueryResult::miss(),
        }
    }

    /// Repeatedly applies sphere-query displacements until the sphere is free or
    /// `max_iterations` steps were taken.
    pub fn resolve_sphere(
        &self,
        grid: &ChunkGrid,
        center: Point3<f32>,
        radius: f32,
        max_iterations: usize,
    ) -> SphereResolution {
        let mut position = center;
        for iteration in 0..max_iterations {
            let query = self.sphere_query(grid, position, radius);
            if !query.hit {
                return SphereResolution {
                    position,
                    iterations: iteration,
                    resolved: true,
                };
            }
            position += query.displacement;
        }

        let resolved = !self.sphere_query(grid, position, radius).hit;
        SphereResolution {
            position,
            iterations: max_iterations,
            resolved,
        }
    }
}

fn push_out(contact: &SurfaceContact, center: Point3<f32>, radius: f32) -> Vector3<f32> {
    let offset = center - contact.closest;
    let outside = offset.dot(contact.normal) >= 0.0;

    if outside && contact.distance > f32::EPSILON {
        offset / contact.distance * (radius - contact.distance)
    } else if outside {
        contact.normal * radius
    } else {
        contact.normal * (radius + contact.distance)
    }
}

/// Push for a sphere whose centre lies in solid density but touches no
/// triangle.
///
/// Marches along the six axes and the density gradient until the field turns
/// open, and returns the shortest exit extended by `radius`. `None` when the
/// centre is not solid or no exit lies inside the window.
fn buried_push_out(grid: &ChunkGrid, center: Point3<f32>, radius: f32) -> Option<Vector3<f32>> {
    let iso = grid.iso_level();
    if grid.sample(center)? >= iso {
        return None;
    }

    let mut directions = vec![
        Vector3::unit_x(),
        -Vector3::unit_x(),
        Vector3::unit_y(),
        -Vector3::unit_y(),
        Vector3::unit_z(),
        -Vector3::unit_z(),
    ];
    if let Some(gradient) = density_gradient(grid, center) {
        directions.push(gradient);
    }

    directions
        .into_iter()
        .filter_map(|direction| {
            exit_distance(grid, center, direction, iso).map(|distance| (direction, distance))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(direction, distance)| direction * (distance + radius))
}

/// Unit central-difference gradient of the density, pointing toward open space.
fn density_gradient(grid: &ChunkGrid, center: Point3<f32>) -> Option<Vector3<f32>> {
    let axis = |unit: Vector3<f32>| -> Option<f32> {
        Some((grid.sample(center + unit)? - grid.sample(center - unit)?) / 2.0)
    };
    let gradient = Vector3::new(
        axis(Vector3::unit_x())?,
        axis(Vector3::unit_y())?,
        axis(Vector3::unit_z())?,
    );
    (gradient.magnitude2() > f32::EPSILON).then(|| gradient.normalize())
}

/// Distance along `direction` from `center` to where the density first reaches
/// `iso`, or `None` if the march leaves the window first.
fn exit_distance(
    grid: &ChunkGrid,
    center: Point3<f32>,
    direction: Vector3<f32>,
    iso: f32,
) -> Option<f32> {
    let mut solid = 0.0;
    let mut open = loop {
        let next = solid + BURIED_MARCH_STEP;
        if grid.sample(center + direction * next)? >= iso {
            break next;
        }
        solid = next;
    };

    for _ in 0..BURIED_REFINE_STEPS {
        let middle = (solid + open) / 2.0;
        match grid.sample(center + direction * middle) {
            Some(density) if density >= iso => open = middle,
            _ => solid = middle,
        }
    }
    Some(open)
}
