//! # Isosurface Extraction
//!
//! Turns a density volume into a triangle mesh with marching cubes, in two
//! dispatches:
//!
//! 1. **Classify and emit**: one invocation per unit cell classifies the cell
//!    against the iso-level, builds up to five triangles and appends them to a
//!    shared append buffer.
//! 2. **Compact**: after reading back the triangle count, the appended triangles
//!    are written into vertex and index arrays sized exactly to the result.
//!
//! ## Contracts
//! - Vertices are chunk-local and lie within `[0, N - 1]` on every axis
//! - Every vertex is interpolated on a cell edge whose endpoints straddle the
//!   iso-level
//! - When a pass produces no triangles the previous mesh is left untouched
//!
//! ## Performance Considerations
//! - The triangle scratch buffer is kept between extractions and only reallocated
//!   when the volume size changes
//! - Each extraction costs exactly one readback

use std::sync::Arc;

use cgmath::{InnerSpace, Point3, Vector3};
use web_time::Instant;

pub mod tables;
mod vertex;

pub use vertex::{Triangle, Vertex};

use super::compute::{AppendBuffer, ComputeContext};
use super::density::DensityVolume;
use tables::{CORNER_OFFSETS, EDGE_CONNECTIONS, EDGE_TABLE, TRI_TABLE};

/// Marching cubes never emits more than five triangles for one cell.
pub const MAX_TRIANGLES_PER_CELL: usize = 5;

/// The surface geometry of one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainMesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl TerrainMesh {
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Iterates the mesh as vertex triples.
    pub fn triangles(&self) -> impl Iterator<Item = [Vertex; 3]> + '_ {
        self.indices.chunks_exact(3).map(|triangle| {
            [
                self.vertices[triangle[0] as usize],
                self.vertices[triangle[1] as usize],
                self.vertices[triangle[2] as usize],
            ]
        })
    }

    /// Drops all geometry, keeping the allocations for the next extraction.
    pub(crate) fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }
}

/// Runs marching cubes over density volumes at a fixed iso-level.
#[derive(Debug)]
pub struct IsosurfaceExtractor {
    compute: Arc<ComputeContext>,
    iso_level: f32,
    triangles: AppendBuffer<Triangle>,
}

impl IsosurfaceExtractor {
    pub fn new(compute: Arc<ComputeContext>, iso_level: f32) -> Self {
        Self {
            compute,
            iso_level,
            triangles: AppendBuffer::with_capacity(0),
        }
    }

    pub fn iso_level(&self) -> f32 {
        self.iso_level
    }

    /// Extracts the isosurface of `volume` into `mesh`.
    ///
    /// # Returns
    /// The number of triangles produced. When it is zero, `mesh` keeps its
    /// previous contents.
    pub fn extract(&mut self, volume: &DensityVolume, mesh: &mut TerrainMesh) -> usize {
        let started = Instant::now();
        let dimensions = volume.dimensions();
        if dimensions.x < 2 || dimensions.y < 2 || dimensions.z < 2 {
            return 0;
        }
        let cells = dimensions.map(|d| d - 1);

        let capacity = cells.x * cells.y * cells.z * MAX_TRIANGLES_PER_CELL;
        if self.triangles.capacity() != capacity {
            self.triangles = AppendBuffer::with_capacity(capacity);
        } else {
            self.triangles.reset();
        }

        let iso_level = self.iso_level;
        let triangles = &self.triangles;
        self.compute.dispatch_3d(cells, |cell| {
            let mut emitted = [Triangle::default(); MAX_TRIANGLES_PER_CELL];
            let count = polygonise_cell(volume, cell, iso_level, &mut emitted);
            if count > 0 {
                triangles.append_all(emitted[..count].iter().copied());
            }
        });

        let count = self.compute.readback(&self.triangles);
        if self.triangles.overflow() > 0 {
            log::warn!(
                "Isosurface append buffer overflowed by {} triangles",
                self.triangles.overflow()
            );
        }
        if count == 0 {
            return 0;
        }

        let appended: &[Triangle] = self.triangles.items_mut();
        mesh.vertices.resize(count * 3, Vertex::default());
        mesh.indices.resize(count * 3, 0);
        self.compute.dispatch_fill(&mut mesh.vertices, |index, vertex| {
            *vertex = appended[index / 3].vertices[index % 3];
        });
        self.compute.dispatch_fill(&mut mesh.indices, |index, slot| {
            *slot = index as u32;
        });

        log::debug!(
            "Extracted {} triangles from {}x{}x{} volume in {:?}",
            count,
            dimensions.x,
            dimensions.y,
            dimensions.z,
            started.elapsed()
        );
        count
    }
}

/// Builds the triangles of one cell, returning how many were written.
fn polygonise_cell(
    volume: &DensityVolume,
    cell: Point3<usize>,
    iso_level: f32,
    out: &mut [Triangle; MAX_TRIANGLES_PER_CELL],
) -> usize {
    let corners = CORNER_OFFSETS.map(|[dx, dy, dz]| cell + Vector3::new(dx, dy, dz));
    let values = corners.map(|corner| volume.get(corner));

    let case = values
        .iter()
        .enumerate()
        .filter(|(_, value)| **value < iso_level)
        .fold(0usize, |case, (i, _)| case | (1 << i));

    let edges = EDGE_TABLE[case];
    if edges == 0 {
        return 0;
    }

    let mut edge_vertices = [Vertex::default(); 12];
    for (edge, [a, b]) in EDGE_CONNECTIONS.iter().enumerate() {
        if edges & (1 << edge) != 0 {
            edge_vertices[edge] = interpolate_vertex(
                volume,
                corners[*a],
                corners[*b],
                values[*a],
                values[*b],
                iso_level,
            );
        }
    }

    let mut count = 0;
    for triangle in TRI_TABLE[case].chunks_exact(3) {
        if triangle[0] < 0 {
            break;
        }
        out[count] = Triangle {
            vertices: [
                edge_vertices[triangle[0] as usize],
                edge_vertices[triangle[1] as usize],
                edge_vertices[triangle[2] as usize],
            ],
        };
        count += 1;
    }
    count
}

fn interpolate_vertex(
    volume: &DensityVolume,
    a: Point3<usize>,
    b: Point3<usize>,
    value_a: f32,
    value_b: f32,
    iso_level: f32,
) -> Vertex {
    let delta = value_b - value_a;
    let t = if delta.abs() > f32::EPSILON {
        ((iso_level - value_a) / delta).clamp(0.0, 1.0)
    } else {
        0.5
    };

    let position_a = a.map(|c| c as f32);
    let position_b = b.map(|c| c as f32);
    let position = position_a + (position_b - position_a) * t;

    let normal = volume.gradient(a) * (1.0 - t) + volume.gradient(b) * t;
    let normal = if normal.magnitude2() > f32::EPSILON {
        normal.normalize()
    } else {
        // Flat field: fall back to the direction from the solid corner to the open one.
        let toward_open = if value_a < value_b {
            position_b - position_a
        } else {
            position_a - position_b
        };
        toward_open.normalize()
    };

    Vertex::new(position, normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::EuclideanSpace;

    const ISO: f32 = 0.5;

    fn extractor() -> IsosurfaceExtractor {
        IsosurfaceExtractor::new(Arc::new(ComputeContext::new(2).unwrap()), ISO)
    }

    fn sphere_volume(size: usize, radius: f32) -> DensityVolume {
        let center = (size - 1) as f32 / 2.0;
        DensityVolume::from_fn(Vector3::new(size, size, size), |p| {
            let offset = p.map(|c| c as f32 - center).to_vec();
            (offset.magnitude() / radius * ISO).clamp(0.0, 1.0)
        })
    }

    #[test]
    fn vertices_stay_inside_the_volume_and_on_the_iso_surface() {
        let volume = sphere_volume(12, 4.0);
        let mut mesh = TerrainMesh::default();

        let count = extractor().extract(&volume, &mut mesh);

        assert!(count > 0);
        assert_eq!(mesh.triangle_count(), count);
        assert_eq!(mesh.vertices().len(), count * 3);
        for vertex in mesh.vertices() {
            let position = vertex.position();
            for c in [position.x, position.y, position.z] {
                assert!((0.0..=11.0).contains(&c));
            }
            let sampled = volume.sample_trilinear(position).unwrap();
            assert_abs_diff_eq!(sampled, ISO, epsilon = 1e-4);
        }
    }

    #[test]
    fn vertices_lie_on_edges_straddling_the_iso_level() {
        let volume = sphere_volume(10, 3.3);
        let mut mesh = TerrainMesh::default();
        extractor().extract(&volume, &mut mesh);

        for vertex in mesh.vertices() {
            let position = vertex.position();
            let low = position.map(|c| c.floor() as usize);
            let high = position.map(|c| c.ceil() as usize);
            let (a, b) = (volume.get(low), volume.get(high));
            assert!(a.min(b) <= ISO && a.max(b) >= ISO, "{a} {b} at {position:?}");
        }
    }

    #[test]
    fn normals_point_toward_open_space() {
        let volume =
            DensityVolume::from_fn(Vector3::new(6, 6, 6), |p| if p.y <= 2 { 0.0 } else { 1.0 });
        let mut mesh = TerrainMesh::default();

        extractor().extract(&volume, &mut mesh);

        assert!(!mesh.is_empty());
        for vertex in mesh.vertices() {
            assert_abs_diff_eq!(vertex.position[1], 2.5, epsilon = 1e-6);
            assert!(vertex.normal().y > 0.9);
        }
    }

    #[test]
    fn empty_result_keeps_previous_mesh() {
        let mut extractor = extractor();
        let mut mesh = TerrainMesh::default();
        extractor.extract(&sphere_volume(8, 2.5), &mut mesh);
        let before = mesh.clone();

        let open = DensityVolume::filled(Vector3::new(8, 8, 8), 1.0);
        let count = extractor.extract(&open, &mut mesh);

        assert_eq!(count, 0);
        assert_eq!(mesh, before);
    }

    #[test]
    fn re_extraction_resizes_buffers_exactly() {
        let mut extractor = extractor();
        let mut mesh = TerrainMesh::default();
        let large = extractor.extract(&sphere_volume(12, 4.5), &mut mesh);
        let small = extractor.extract(&sphere_volume(12, 1.5), &mut mesh);

        assert!(small < large);
        assert_eq!(mesh.indices().len(), small * 3);
        assert_eq!(mesh.triangles().count(), small);
    }
}
