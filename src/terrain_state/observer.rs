//! # Observer Tracking
//!
//! Follows the position the terrain streams around and reports when it crossed
//! into a new voxel or chunk, so the expensive consumers (window sliding and
//! navigation) only run when something they depend on moved.

use cgmath::{Point3, Vector3};

use super::chunks::ChunkGrid;

/// Last known observer position and the discrete cells derived from it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObserverState {
    position: Option<Point3<f32>>,
    voxel: Option<Point3<i32>>,
    chunk: Option<Vector3<usize>>,
}

/// What changed since the previous [`ObserverState::update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverUpdates {
    pub voxel_changed: bool,
    pub chunk_changed: bool,
    /// Chunk holding the observer, `None` outside the window
    pub chunk_index: Option<Vector3<usize>>,
}

impl ObserverState {
    pub fn position(&self) -> Option<Point3<f32>> {
        self.position
    }

    /// Rounded observer voxel.
    pub fn voxel(&self) -> Option<Point3<i32>> {
        self.voxel
    }

    pub fn chunk(&self) -> Option<Vector3<usize>> {
        self.chunk
    }

    /// Records a new observer position.
    ///
    /// The chunk is looked up in `grid`'s current window, so calling this again
    /// after the window slid reports a chunk change even if the observer stayed
    /// put.
    pub fn update(&mut self, grid: &ChunkGrid, position: Point3<f32>) -> ObserverUpdates {
        let voxel = position.map(|c| c.round() as i32);
        let chunk = grid.chunk_index_of(position);

        let updates = ObserverUpdates {
            voxel_changed: self.voxel != Some(voxel),
            chunk_changed: self.chunk != chunk,
            chunk_index: chunk,
        };

        self.position = Some(position);
        self.voxel = Some(voxel);
        self.chunk = chunk;
        updates
    }
}
