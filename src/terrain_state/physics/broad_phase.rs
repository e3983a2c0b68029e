//! Coarse chunk selection ahead of the per-triangle passes.
//!
//! The broad phase only knows chunk bounding boxes. It shortlists the chunks a
//! sphere can touch and finds where a ray next crosses a chunk boundary; the
//! precise mesh tests are left to the collision layer.

use cgmath::{InnerSpace, Point3, Vector3};

use super::intersection::Ray;
use crate::terrain_state::chunks::Chunk;

/// Axis-aligned bounds of one chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkCollider {
    pub grid_index: Vector3<usize>,
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl ChunkCollider {
    pub fn from_chunk(chunk: &Chunk, step: i32) -> Self {
        let min = chunk.world_origin();
        let extent = step as f32;
        Self {
            grid_index: chunk.grid_index(),
            min,
            max: min + Vector3::new(extent, extent, extent),
        }
    }

    pub fn closest_point(&self, p: Point3<f32>) -> Point3<f32> {
        Point3::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
            p.z.clamp(self.min.z, self.max.z),
        )
    }

    /// Slab test returning the `(entry, exit)` distances of `ray` through the box.
    pub fn ray_span(&self, ray: &Ray) -> Option<(f32, f32)> {
        let mut near = f32::NEG_INFINITY;
        let mut far = f32::INFINITY;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            let (slab_min, slab_max) = (self.min[axis], self.max[axis]);
            if direction.abs() < 1e-8 {
                if origin < slab_min || origin > slab_max {
                    return None;
                }
                continue;
            }
            let inverse = 1.0 / direction;
            let mut t0 = (slab_min - origin) * inverse;
            let mut t1 = (slab_max - origin) * inverse;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            near = near.max(t0);
            far = far.min(t1);
            if far < near {
                return None;
            }
        }
        (far >= 0.0).then_some((near, far))
    }
}

/// Chunk-level overlap and ray queries.
pub trait BroadPhase: Send + Sync {
    /// Chunks whose bounds overlap the sphere.
    fn overlap_sphere(
        &self,
        colliders: &[ChunkCollider],
        center: Point3<f32>,
        radius: f32,
    ) -> Vec<Vector3<usize>>;

    /// Distance along `ray` to the nearest point ahead where it enters or leaves
    /// a chunk, within `ray.max_distance`.
    fn next_boundary(&self, colliders: &[ChunkCollider], ray: &Ray) -> Option<f32>;
}

/// Brute-force broad phase over chunk bounding boxes.
///
/// The grid holds a few dozen chunks, so testing every box is cheaper than
/// maintaining a spatial index.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkBoundsBroadPhase;

impl BroadPhase for ChunkBoundsBroadPhase {
    fn overlap_sphere(
        &self,
        colliders: &[ChunkCollider],
        center: Point3<f32>,
        radius: f32,
    ) -> Vec<Vector3<usize>> {
        colliders
            .iter()
            .filter(|collider| {
                (center - collider.closest_point(center)).magnitude2() <= radius * radius
            })
            .map(|collider| collider.grid_index)
            .collect()
    }

    fn next_boundary(&self, colliders: &[ChunkCollider], ray: &Ray) -> Option<f32> {
        colliders
            .iter()
            .filter_map(|collider| collider.ray_span(ray))
            .filter_map(|(entry, exit)| {
                if entry > 0.0 {
                    Some(entry)
                } else {
                    (exit > 0.0).then_some(exit)
                }
            })
            .filter(|distance| *distance <= ray.max_distance)
            .min_by(f32::total_cmp)
    }
}
