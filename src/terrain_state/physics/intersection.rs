//! Ray and sphere tests against chunk meshes.
//!
//! Each test is a compute pass with one invocation per triangle. Candidate hits
//! go to an append buffer and the caller reads the count back once per pass.

use cgmath::{EuclideanSpace, InnerSpace, Point3, Vector3};

use crate::terrain_state::compute::{AppendBuffer, ComputeContext};
use crate::terrain_state::meshing::{TerrainMesh, Vertex};

/// Hits each ray may record per pass before further hits are dropped.
pub const HIT_CAPACITY_PER_RAY: usize = 100;

const PARALLEL_EPSILON: f32 = 1e-7;

/// A ray with a normalized direction and a maximum travel distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
    pub max_distance: f32,
}

impl Ray {
    /// Builds a ray, normalizing `direction`. Returns `None` for a zero or
    /// non-finite direction.
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>, max_distance: f32) -> Option<Self> {
        let length = direction.magnitude();
        if !length.is_finite() || length <= f32::EPSILON {
            return None;
        }
        Some(Self {
            origin,
            direction: direction / length,
            max_distance,
        })
    }

    /// A ray without a distance limit.
    pub fn unbounded(origin: Point3<f32>, direction: Vector3<f32>) -> Option<Self> {
        Self::new(origin, direction, f32::INFINITY)
    }

    pub fn at(&self, distance: f32) -> Point3<f32> {
        self.origin + self.direction * distance
    }
}

/// Where a ray met the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub position: Point3<f32>,
    /// Face normal on the open side of the surface
    pub normal: Vector3<f32>,
    /// Distance travelled from the ray's origin
    pub distance: f32,
}

/// The point of a mesh nearest to a sphere's centre.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceContact {
    pub closest: Point3<f32>,
    pub distance: f32,
    /// Normal of the touched face, on the open side of the surface
    pub normal: Vector3<f32>,
}

/// Möller–Trumbore ray/triangle test, returning the distance along the ray.
pub fn intersect_triangle(
    origin: Point3<f32>,
    direction: Vector3<f32>,
    triangle: [Point3<f32>; 3],
) -> Option<f32> {
    let [a, b, c] = triangle;
    let edge1 = b - a;
    let edge2 = c - a;

    let p = direction.cross(edge2);
    let determinant = edge1.dot(p);
    if determinant.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inverse = 1.0 / determinant;

    let s = origin - a;
    let u = s.dot(p) * inverse;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = direction.dot(q) * inverse;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let distance = edge2.dot(q) * inverse;
    (distance >= 0.0).then_some(distance)
}

/// Closest point on triangle `abc` to `p`, after Ericson's Real-Time Collision
/// Detection (5.1.5).
pub fn closest_point_on_triangle(p: Point3<f32>, triangle: [Point3<f32>; 3]) -> Point3<f32> {
    let [a, b, c] = triangle;
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denominator = 1.0 / (va + vb + vc);
    a + ab * (vb * denominator) + ac * (vc * denominator)
}

fn triangle_positions(triangle: &[Vertex; 3], offset: Vector3<f32>) -> [Point3<f32>; 3] {
    triangle.map(|vertex| vertex.position() + offset)
}

/// Face normal oriented to agree with the interpolated vertex normals.
fn oriented_face_normal(triangle: &[Vertex; 3], positions: &[Point3<f32>; 3]) -> Vector3<f32> {
    let face = (positions[1] - positions[0]).cross(positions[2] - positions[0]);
    if face.magnitude2() <= f32::EPSILON * f32::EPSILON {
        return Vector3::new(0.0, 0.0, 0.0);
    }
    let face = face.normalize();
    let shading = triangle[0].normal() + triangle[1].normal() + triangle[2].normal();
    if face.dot(shading) < 0.0 {
        -face
    } else {
        face
    }
}

/// Casts each ray against `mesh`, placed at `mesh_origin`, in one pass.
///
/// # Returns
/// The nearest hit within each ray's `max_distance`, in the order of `rays`.
pub fn raycast_mesh_batch(
    compute: &ComputeContext,
    mesh: &TerrainMesh,
    mesh_origin: Point3<f32>,
    rays: &[Ray],
) -> Vec<Option<RayHit>> {
    let mut nearest = vec![None; rays.len()];
    if mesh.is_empty() || rays.is_empty() {
        return nearest;
    }

    let triangles: Vec<[Vertex; 3]> = mesh.triangles().collect();
    let offset = mesh_origin.to_vec();
    let hits = AppendBuffer::with_capacity(rays.len() * HIT_CAPACITY_PER_RAY);

    compute.dispatch_items(&triangles, |_, triangle| {
        let positions = triangle_positions(triangle, offset);
        for (ray_index, ray) in rays.iter().enumerate() {
            if let Some(distance) = intersect_triangle(ray.origin, ray.direction, positions) {
                if distance <= ray.max_distance {
                    hits.append((ray_index, distance, oriented_face_normal(triangle, &positions)));
                }
            }
        }
    });

    if compute.readback(&hits) == 0 {
        return nearest;
    }
    if hits.overflow() > 0 {
        log::warn!("Ray hit buffer overflowed by {} hits", hits.overflow());
    }

    for (ray_index, distance, normal) in hits.into_vec() {
        let ray = &rays[ray_index];
        let closer = nearest[ray_index]
            .map_or(true, |best: RayHit| distance < best.distance);
        if closer {
            nearest[ray_index] = Some(RayHit {
                position: ray.at(distance),
                normal,
                distance,
            });
        }
    }
    nearest
}

/// Casts a single ray against `mesh`.
pub fn raycast_mesh(
    compute: &ComputeContext,
    mesh: &TerrainMesh,
    mesh_origin: Point3<f32>,
    ray: &Ray,
) -> Option<RayHit> {
    raycast_mesh_batch(compute, mesh, mesh_origin, std::slice::from_ref(ray))
        .into_iter()
        .next()
        .flatten()
}

/// Finds the point of `mesh` nearest to `center` among triangles closer than
/// `radius`.
pub fn sphere_contact(
    compute: &ComputeContext,
    mesh: &TerrainMesh,
    mesh_origin: Point3<f32>,
    center: Point3<f32>,
    radius: f32,
) -> Option<SurfaceContact> {
    if mesh.is_empty() {
        return None;
    }

    let triangles: Vec<[Vertex; 3]> = mesh.triangles().collect();
    let offset = mesh_origin.to_vec();
    let contacts = AppendBuffer::with_capacity(triangles.len());

    compute.dispatch_items(&triangles, |_, triangle| {
        let positions = triangle_positions(triangle, offset);
        let closest = closest_point_on_triangle(center, positions);
        let distance = (center - closest).magnitude();
        if distance < radius {
            contacts.append(SurfaceContact {
                closest,
                distance,
                normal: oriented_face_normal(triangle, &positions),
            });
        }
    });

    if compute.readback(&contacts) == 0 {
        return None;
    }
    contacts
        .into_vec()
        .into_iter()
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn floor_triangle() -> [Point3<f32>; 3] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 4.0),
        ]
    }

    #[test]
    fn ray_hits_triangle_from_either_side() {
        let triangle = floor_triangle();

        let down = intersect_triangle(Point3::new(1.0, 3.0, 1.0), -Vector3::unit_y(), triangle);
        let up = intersect_triangle(Point3::new(1.0, -2.0, 1.0), Vector3::unit_y(), triangle);

        assert_abs_diff_eq!(down.unwrap(), 3.0);
        assert_abs_diff_eq!(up.unwrap(), 2.0);
    }

    #[test]
    fn ray_misses_behind_origin_and_outside_edges() {
        let triangle = floor_triangle();

        let behind = intersect_triangle(Point3::new(1.0, 3.0, 1.0), Vector3::unit_y(), triangle);
        let outside = intersect_triangle(Point3::new(3.0, 3.0, 3.0), -Vector3::unit_y(), triangle);
        let parallel = intersect_triangle(Point3::new(1.0, 3.0, 1.0), Vector3::unit_x(), triangle);

        assert!(behind.is_none());
        assert!(outside.is_none());
        assert!(parallel.is_none());
    }

    #[test]
    fn closest_point_covers_face_edge_and_vertex_regions() {
        let triangle = floor_triangle();

        let face = closest_point_on_triangle(Point3::new(1.0, 2.0, 1.0), triangle);
        let edge = closest_point_on_triangle(Point3::new(2.0, 0.0, -3.0), triangle);
        let vertex = closest_point_on_triangle(Point3::new(-1.0, 5.0, -1.0), triangle);

        assert_abs_diff_eq!(face.x, 1.0);
        assert_abs_diff_eq!(face.y, 0.0);
        assert_abs_diff_eq!(face.z, 1.0);
        assert_abs_diff_eq!(edge.x, 2.0);
        assert_abs_diff_eq!(edge.z, 0.0);
        assert_eq!(vertex, Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn zero_direction_is_not_a_ray() {
        assert!(Ray::unbounded(Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0)).is_none());

        let ray = Ray::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 2.0), 5.0).unwrap();
        assert_abs_diff_eq!(ray.direction.z, 1.0);
    }
}
