//! Vertex data produced by isosurface extraction.
//!
//! The layout is plain-old-data so mesh buffers can be handed to a renderer or
//! copied into GPU storage with `bytemuck::cast_slice`.

use cgmath::{Point3, Vector3};

/// A surface vertex in chunk-local space.
///
/// # Memory Layout
/// - Position: 3x f32 (12 bytes)
/// - Normal: 3x f32 (12 bytes)
///
/// Total size: 24 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    /// Position relative to the owning chunk's origin
    pub position: [f32; 3],
    /// Unit normal pointing from solid toward open space
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn new(position: Point3<f32>, normal: Vector3<f32>) -> Self {
        Vertex {
            position: position.into(),
            normal: normal.into(),
        }
    }

    pub fn position(&self) -> Point3<f32> {
        Point3::from(self.position)
    }

    pub fn normal(&self) -> Vector3<f32> {
        Vector3::from(self.normal)
    }
}

/// Three vertices appended together by one marching-cubes invocation.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Triangle {
    pub vertices: [Vertex; 3],
}
