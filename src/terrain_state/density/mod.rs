//! # Density Field Store
//!
//! Per-chunk scalar volumes generated from procedural noise. A density of `0` is
//! solid rock, `1` is open air, and the terrain surface is the iso-level crossing
//! in between.
//!
//! ## Key Components
//! - `DensityVolume`: the sample storage of one chunk (or of the combined
//!   navigation volume)
//! - `DensityGenerator`: fills volumes from a `DensityFunction` clamped by the
//!   world's `VerticalBand`
//! - `DensitySource`: voxel-addressed read access across chunk boundaries, used
//!   for point classification by navigation and path search
//!
//! ## Neighbourhood Resolution
//! Any voxel's 27-neighbourhood (itself plus its 26 neighbours) is fetched through
//! the single `NEIGHBOUR_OFFSETS` table and the source's voxel resolution, so a
//! neighbour in another chunk costs nothing special.
//!
//! Mutation never happens here; volumes are written by the chunk grid on
//! (re)generation and by the terrain carver.

use cgmath::{Point3, Vector3};

mod generation;
mod volume;

pub use generation::{DensityFunction, DensityGenerator, NoiseDensity, VerticalBand};
pub use volume::DensityVolume;

/// Offsets of a voxel's 27-neighbourhood. Entry `i` is
/// `(i % 3 - 1, i / 9 - 1, i % 9 / 3 - 1)`; entry 13 is the voxel itself.
pub const NEIGHBOUR_OFFSETS: [Vector3<i32>; 27] = neighbour_offsets();

/// Index of the zero offset in [`NEIGHBOUR_OFFSETS`].
pub const CENTER_NEIGHBOUR: usize = 13;

const fn neighbour_offsets() -> [Vector3<i32>; 27] {
    let mut offsets = [Vector3 { x: 0, y: 0, z: 0 }; 27];
    let mut i = 0;
    while i < 27 {
        offsets[i] = Vector3 {
            x: (i % 3) as i32 - 1,
            y: (i / 9) as i32 - 1,
            z: (i % 9 / 3) as i32 - 1,
        };
        i += 1;
    }
    offsets
}

/// Read access to density by world-space voxel coordinate.
///
/// Implemented by the live chunk grid and by the immutable snapshots handed to
/// background path searches.
pub trait DensitySource {
    /// The sample at an integer world position, or `None` outside the source.
    fn density_at_voxel(&self, voxel: Point3<i32>) -> Option<f32>;

    /// Inclusive voxel bounds `(min, max)` of the source.
    fn voxel_bounds(&self) -> (Point3<i32>, Point3<i32>);

    /// Samples of `voxel` and its 26 neighbours, in [`NEIGHBOUR_OFFSETS`] order.
    fn neighbourhood(&self, voxel: Point3<i32>) -> [Option<f32>; 27] {
        NEIGHBOUR_OFFSETS.map(|offset| self.density_at_voxel(voxel + offset))
    }

    /// Trilinearly interpolated density at a world position.
    ///
    /// Corners with zero weight are never fetched, so positions lying exactly on
    /// the last sample layer still resolve. Returns `None` when a contributing
    /// corner lies outside the source.
    fn sample(&self, world: Point3<f32>) -> Option<f32> {
        if !(world.x.is_finite() && world.y.is_finite() && world.z.is_finite()) {
            return None;
        }

        let base = world.map(|c| c.floor() as i32);
        let t = Vector3::new(
            world.x - base.x as f32,
            world.y - base.y as f32,
            world.z - base.z as f32,
        );

        let mut value = 0.0;
        for corner in 0..8 {
            let offset = Vector3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let weight = axis_weight(t.x, offset.x)
                * axis_weight(t.y, offset.y)
                * axis_weight(t.z, offset.z);
            if weight == 0.0 {
                continue;
            }
            value += weight * self.density_at_voxel(base + offset)?;
        }
        Some(value)
    }
}

fn axis_weight(t: f32, upper: i32) -> f32 {
    if upper == 1 {
        t
    } else {
        1.0 - t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct Ramp;

    impl DensitySource for Ramp {
        fn density_at_voxel(&self, voxel: Point3<i32>) -> Option<f32> {
            (0..=10)
                .contains(&voxel.x)
                .then(|| voxel.x as f32 / 10.0)
        }

        fn voxel_bounds(&self) -> (Point3<i32>, Point3<i32>) {
            (Point3::new(0, i32::MIN, i32::MIN), Point3::new(10, i32::MAX, i32::MAX))
        }
    }

    #[test]
    fn neighbour_offsets_follow_index_formula() {
        assert_eq!(NEIGHBOUR_OFFSETS[0], Vector3::new(-1, -1, -1));
        assert_eq!(NEIGHBOUR_OFFSETS[CENTER_NEIGHBOUR], Vector3::new(0, 0, 0));
        assert_eq!(NEIGHBOUR_OFFSETS[5], Vector3::new(1, -1, 0));
        assert_eq!(NEIGHBOUR_OFFSETS[26], Vector3::new(1, 1, 1));

        let mut unique = NEIGHBOUR_OFFSETS.to_vec();
        unique.sort_by_key(|o| (o.x, o.y, o.z));
        unique.dedup();
        assert_eq!(unique.len(), 27);
    }

    #[test]
    fn neighbourhood_reports_missing_neighbours() {
        let samples = Ramp.neighbourhood(Point3::new(0, 4, 4));

        assert!(samples[0].is_none());
        assert_abs_diff_eq!(samples[CENTER_NEIGHBOUR].unwrap(), 0.0);
        assert_abs_diff_eq!(samples[26].unwrap(), 0.1);
    }

    #[test]
    fn sample_interpolates_and_resolves_last_layer() {
        let value = Ramp.sample(Point3::new(2.5, 1.3, -7.9)).unwrap();

        assert_abs_diff_eq!(value, 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(Ramp.sample(Point3::new(10.0, 0.0, 0.0)).unwrap(), 1.0);
        assert!(Ramp.sample(Point3::new(10.5, 0.0, 0.0)).is_none());
    }
}
