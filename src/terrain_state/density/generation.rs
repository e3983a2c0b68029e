use std::sync::Arc;

use cgmath::{EuclideanSpace, Point3, Vector3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::DensityVolume;
use crate::terrain_state::compute::ComputeContext;
use crate::terrain_state::config::TerrainConfig;

/// A deterministic scalar field over world space producing densities in `[0, 1]`.
pub trait DensityFunction: Send + Sync {
    fn density_at(&self, world: Point3<f32>) -> f32;
}

impl<F> DensityFunction for F
where
    F: Fn(Point3<f32>) -> f32 + Send + Sync,
{
    fn density_at(&self, world: Point3<f32>) -> f32 {
        self(world)
    }
}

/// Fractal Perlin noise remapped from `[-1, 1]` into `[0, 1]`.
pub struct NoiseDensity {
    noise: Fbm<Perlin>,
}

impl NoiseDensity {
    pub fn new(seed: u32, frequency: f64) -> Self {
        let noise = Fbm::<Perlin>::new(seed)
            .set_octaves(3)
            .set_frequency(frequency);
        Self { noise }
    }

    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(config.noise_seed, config.noise_frequency())
    }
}

impl DensityFunction for NoiseDensity {
    fn density_at(&self, world: Point3<f32>) -> f32 {
        let value = self
            .noise
            .get([world.x as f64, world.y as f64, world.z as f64]);
        (value * 0.5 + 0.5).clamp(0.0, 1.0) as f32
    }
}

/// The solid floor and roof of the world.
///
/// `cap(y)` is `0` at the vertical limits and rises linearly to `1` over
/// `thickness` world units. Generated density never exceeds the cap and carving
/// may not raise a sample above it, so the world stays sealed top and bottom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VerticalBand {
    pub floor: f32,
    pub roof: f32,
    pub thickness: f32,
}

impl VerticalBand {
    pub fn from_config(config: &TerrainConfig) -> Self {
        let (floor, roof) = config.vertical_extent();
        Self {
            floor,
            roof,
            thickness: config.boundary_thickness,
        }
    }

    pub fn cap(&self, world_y: f32) -> f32 {
        if self.thickness <= 0.0 {
            return 1.0;
        }
        let distance = (world_y - self.floor).min(self.roof - world_y);
        (distance / self.thickness).clamp(0.0, 1.0)
    }
}

/// Fills chunk volumes from a density function clamped by the vertical band.
#[derive(Clone)]
pub struct DensityGenerator {
    function: Arc<dyn DensityFunction>,
    band: VerticalBand,
    chunk_size: usize,
}

impl DensityGenerator {
    pub fn new(function: Arc<dyn DensityFunction>, band: VerticalBand, chunk_size: usize) -> Self {
        Self {
            function,
            band,
            chunk_size,
        }
    }

    pub fn band(&self) -> &VerticalBand {
        &self.band
    }

    pub fn chunk_dimensions(&self) -> Vector3<usize> {
        Vector3::new(self.chunk_size, self.chunk_size, self.chunk_size)
    }

    /// Generates the volume of a chunk whose first sample sits at `origin`.
    pub fn generate(&self, compute: &ComputeContext, origin: Point3<i32>) -> DensityVolume {
        let mut volume = DensityVolume::filled(self.chunk_dimensions(), 0.0);
        self.regenerate(compute, &mut volume, origin);
        volume
    }

    /// Rewrites every sample of `volume` for a chunk at `origin`, reusing its storage.
    pub fn regenerate(
        &self,
        compute: &ComputeContext,
        volume: &mut DensityVolume,
        origin: Point3<i32>,
    ) {
        let extent = volume.dimensions();
        let origin = origin.map(|c| c as f32);
        compute.dispatch_volume_mut(volume, Point3::new(0, 0, 0), extent, |local, sample| {
            let world = origin + local.map(|c| c as f32).to_vec();
            *sample = self
                .function
                .density_at(world)
                .min(self.band.cap(world.y));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn band_seals_floor_and_roof() {
        let band = VerticalBand {
            floor: 0.0,
            roof: 62.0,
            thickness: 2.0,
        };

        assert_abs_diff_eq!(band.cap(0.0), 0.0);
        assert_abs_diff_eq!(band.cap(1.0), 0.5);
        assert_abs_diff_eq!(band.cap(31.0), 1.0);
        assert_abs_diff_eq!(band.cap(62.0), 0.0);
    }

    #[test]
    fn zero_thickness_band_never_caps() {
        let band = VerticalBand {
            floor: 0.0,
            roof: 10.0,
            thickness: 0.0,
        };

        assert_abs_diff_eq!(band.cap(0.0), 1.0);
    }

    #[test]
    fn noise_density_is_deterministic_and_normalized() {
        let first = NoiseDensity::new(7, 0.06);
        let second = NoiseDensity::new(7, 0.06);

        for i in 0..32 {
            let world = Point3::new(i as f32 * 1.7, i as f32 * 0.3, -(i as f32));
            let value = first.density_at(world);
            assert_eq!(value, second.density_at(world));
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn generation_applies_world_offset_and_band() {
        let compute = ComputeContext::new(2).unwrap();
        let generator = DensityGenerator::new(
            Arc::new(|world: Point3<f32>| (world.x / 100.0).clamp(0.0, 1.0)),
            VerticalBand {
                floor: 0.0,
                roof: 6.0,
                thickness: 1.0,
            },
            4,
        );

        let volume = generator.generate(&compute, Point3::new(40, 0, 0));

        assert_abs_diff_eq!(volume.get(Point3::new(2, 2, 1)), 0.42, epsilon = 1e-6);
        assert_abs_diff_eq!(volume.get(Point3::new(2, 0, 1)), 0.0);
    }
}
