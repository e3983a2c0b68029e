//! # Compute Dispatch
//!
//! Data-parallel kernels with the same shape as compute-shader dispatches. Every
//! terrain pass (noise generation, marching cubes, carving, flood fill, collision)
//! is written as a kernel invoked once per cell or per item, with results flowing
//! out through [`AppendBuffer`]s whose only synchronization point is a counter
//! readback.
//!
//! ## Key Components
//! - `ComputeContext`: owns the worker pool kernels run on and counts readbacks
//! - `AppendBuffer`: fixed-capacity output with an atomic counter
//! - `PingPong`: two append buffers whose consume/append roles swap each iteration
//!
//! ## Performance Considerations
//! - Readbacks are the expensive part of a pass; callers batch them per chunk change
//!   rather than per frame where possible
//! - Kernels must be `Sync`; they only read shared state and write through
//!   append buffers, atomics or disjoint `&mut` slices

use std::sync::atomic::{AtomicUsize, Ordering};

use cgmath::{Point3, Vector3};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

mod append_buffer;

pub use append_buffer::{AppendBuffer, PingPong};

use super::density::DensityVolume;

/// The pool every kernel of a terrain session is dispatched on.
///
/// `ComputeContext` stands in for the device queue: it is shared by every pass
/// through an `Arc` and records how many blocking readbacks the session performed.
#[derive(Debug)]
pub struct ComputeContext {
    pool: ThreadPool,
    readbacks: AtomicUsize,
}

impl ComputeContext {
    /// Creates a context backed by `num_threads` workers (`0` lets rayon pick).
    pub fn new(num_threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("terrain-compute-{index}"))
            .build()?;

        log::info!(
            "Compute context initialized with {} threads",
            pool.current_num_threads()
        );

        Ok(Self {
            pool,
            readbacks: AtomicUsize::new(0),
        })
    }

    /// Runs `kernel` once for every cell of `extent`.
    pub fn dispatch_3d<F>(&self, extent: Vector3<usize>, kernel: F)
    where
        F: Fn(Point3<usize>) + Sync,
    {
        if extent.x == 0 || extent.y == 0 || extent.z == 0 {
            return;
        }

        self.pool.install(|| {
            (0..extent.y * extent.z).into_par_iter().for_each(|row| {
                let y = row % extent.y;
                let z = row / extent.y;
                for x in 0..extent.x {
                    kernel(Point3::new(x, y, z));
                }
            });
        });
    }

    /// Runs `kernel` once per item, the one-dimensional dispatch used for
    /// triangle and frontier passes.
    pub fn dispatch_items<T, F>(&self, items: &[T], kernel: F)
    where
        T: Sync,
        F: Fn(usize, &T) + Sync,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .enumerate()
                .for_each(|(index, item)| kernel(index, item));
        });
    }

    /// Runs `kernel` once per element of `output`, each invocation owning its slot.
    pub fn dispatch_fill<T, F>(&self, output: &mut [T], kernel: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync,
    {
        self.pool.install(|| {
            output
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, slot)| kernel(index, slot));
        });
    }

    /// Runs `kernel` over the sub-region `min..min + extent` of `volume`, handing
    /// each invocation exclusive access to its sample.
    ///
    /// The region is clamped to the volume; an empty region dispatches nothing.
    pub fn dispatch_volume_mut<F>(
        &self,
        volume: &mut DensityVolume,
        min: Point3<usize>,
        extent: Vector3<usize>,
        kernel: F,
    ) where
        F: Fn(Point3<usize>, &mut f32) + Sync,
    {
        let dimensions = volume.dimensions();
        let max = Point3::new(
            (min.x + extent.x).min(dimensions.x),
            (min.y + extent.y).min(dimensions.y),
            (min.z + extent.z).min(dimensions.z),
        );
        if min.x >= max.x || min.y >= max.y || min.z >= max.z {
            return;
        }

        let plane = dimensions.x * dimensions.y;
        self.pool.install(|| {
            volume
                .samples_mut()
                .par_chunks_mut(plane)
                .enumerate()
                .filter(|(z, _)| (min.z..max.z).contains(z))
                .for_each(|(z, samples)| {
                    for y in min.y..max.y {
                        for x in min.x..max.x {
                            kernel(Point3::new(x, y, z), &mut samples[x + y * dimensions.x]);
                        }
                    }
                });
        });
    }

    /// Reads the counter of `buffer` back to the caller.
    ///
    /// This is the blocking synchronization point of a pass and is counted in
    /// [`ComputeContext::readback_count`].
    pub fn readback<T>(&self, buffer: &AppendBuffer<T>) -> usize {
        self.readbacks.fetch_add(1, Ordering::Relaxed);
        buffer.count()
    }

    /// Total number of readbacks performed through this context.
    pub fn readback_count(&self) -> usize {
        self.readbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_3d_visits_every_cell_once() {
        let context = ComputeContext::new(2).unwrap();
        let visited = AppendBuffer::with_capacity(64);

        context.dispatch_3d(Vector3::new(4, 2, 3), |cell| {
            visited.append(cell);
        });

        assert_eq!(context.readback(&visited), 24);
        let mut cells = visited.into_vec();
        cells.sort_by_key(|cell| (cell.z, cell.y, cell.x));
        cells.dedup();
        assert_eq!(cells.len(), 24);
    }

    #[test]
    fn dispatch_volume_mut_only_touches_region() {
        let context = ComputeContext::new(2).unwrap();
        let mut volume = DensityVolume::filled(Vector3::new(4, 4, 4), 0.0);

        context.dispatch_volume_mut(
            &mut volume,
            Point3::new(1, 1, 1),
            Vector3::new(2, 2, 10),
            |_, sample| *sample = 1.0,
        );

        assert_eq!(volume.get(Point3::new(1, 1, 1)), 1.0);
        assert_eq!(volume.get(Point3::new(2, 2, 3)), 1.0);
        assert_eq!(volume.get(Point3::new(0, 1, 1)), 0.0);
        assert_eq!(volume.get(Point3::new(3, 2, 2)), 0.0);
        assert_eq!(volume.samples().iter().filter(|s| **s == 1.0).count(), 12);
    }

    #[test]
    fn readbacks_are_counted() {
        let context = ComputeContext::new(1).unwrap();
        let buffer: AppendBuffer<u32> = AppendBuffer::with_capacity(4);

        context.readback(&buffer);
        context.readback(&buffer);

        assert_eq!(context.readback_count(), 2);
    }
}
