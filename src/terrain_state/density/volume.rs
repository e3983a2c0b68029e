use cgmath::{InnerSpace, Point3, Vector3};

/// A dense 3D grid of density samples, stored x-fastest then y then z.
///
/// Values lie in `[0, 1]`: `0` is solid rock and `1` is empty air. The
/// isosurface sits where the density crosses the configured iso-level.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityVolume {
    dimensions: Vector3<usize>,
    samples: Vec<f32>,
}

impl DensityVolume {
    /// Creates a volume with every sample set to `value`.
    pub fn filled(dimensions: Vector3<usize>, value: f32) -> Self {
        Self {
            dimensions,
            samples: vec![value; dimensions.x * dimensions.y * dimensions.z],
        }
    }

    /// Creates a volume by evaluating `f` at each local sample position.
    pub fn from_fn(dimensions: Vector3<usize>, mut f: impl FnMut(Point3<usize>) -> f32) -> Self {
        let mut volume = Self::filled(dimensions, 0.0);
        for z in 0..dimensions.z {
            for y in 0..dimensions.y {
                for x in 0..dimensions.x {
                    let position = Point3::new(x, y, z);
                    let index = volume.index(position);
                    volume.samples[index] = f(position);
                }
            }
        }
        volume
    }

    pub fn dimensions(&self) -> Vector3<usize> {
        self.dimensions
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub(crate) fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    #[inline]
    pub fn index(&self, position: Point3<usize>) -> usize {
        position.x + self.dimensions.x * (position.y + self.dimensions.y * position.z)
    }

    pub fn contains(&self, position: Point3<i32>) -> bool {
        position.x >= 0
            && position.y >= 0
            && position.z >= 0
            && (position.x as usize) < self.dimensions.x
            && (position.y as usize) < self.dimensions.y
            && (position.z as usize) < self.dimensions.z
    }

    /// The sample at `position`. Panics when out of range, like slice indexing.
    #[inline]
    pub fn get(&self, position: Point3<usize>) -> f32 {
        self.samples[self.index(position)]
    }

    /// The sample at a signed position, or `None` outside the volume.
    pub fn try_get(&self, position: Point3<i32>) -> Option<f32> {
        self.contains(position).then(|| {
            self.get(Point3::new(
                position.x as usize,
                position.y as usize,
                position.z as usize,
            ))
        })
    }

    pub(crate) fn set(&mut self, position: Point3<usize>, value: f32) {
        let index = self.index(position);
        self.samples[index] = value;
    }

    /// Density gradient at a sample, from central differences (one-sided at the
    /// volume border). Points from solid toward open space.
    pub fn gradient(&self, position: Point3<usize>) -> Vector3<f32> {
        let axis = |step: Vector3<usize>, extent: usize, coordinate: usize| -> f32 {
            let low = if coordinate > 0 { position - step } else { position };
            let high = if coordinate + 1 < extent {
                position + step
            } else {
                position
            };
            let span = (high - low).x + (high - low).y + (high - low).z;
            if span == 0 {
                return 0.0;
            }
            (self.get(high) - self.get(low)) / span as f32
        };

        Vector3::new(
            axis(Vector3::unit_x(), self.dimensions.x, position.x),
            axis(Vector3::unit_y(), self.dimensions.y, position.y),
            axis(Vector3::unit_z(), self.dimensions.z, position.z),
        )
    }

    /// Unit surface normal at a sample, or zero where the field is flat.
    pub fn normal(&self, position: Point3<usize>) -> Vector3<f32> {
        let gradient = self.gradient(position);
        if gradient.magnitude2() > f32::EPSILON {
            gradient.normalize()
        } else {
            Vector3::new(0.0, 0.0, 0.0)
        }
    }

    /// Trilinearly interpolated density at a fractional local position, or
    /// `None` outside `[0, dimension - 1]` on any axis.
    pub fn sample_trilinear(&self, local: Point3<f32>) -> Option<f32> {
        let max = self.dimensions.map(|d| d.saturating_sub(1) as f32);
        if self.samples.is_empty()
            || !(0.0..=max.x).contains(&local.x)
            || !(0.0..=max.y).contains(&local.y)
            || !(0.0..=max.z).contains(&local.z)
        {
            return None;
        }

        let base = local.map(|c| c.floor() as usize);
        let t = local - base.map(|c| c as f32);
        let upper = |c: usize, limit: usize| (c + 1).min(limit - 1);

        let x1 = upper(base.x, self.dimensions.x);
        let y1 = upper(base.y, self.dimensions.y);
        let z1 = upper(base.z, self.dimensions.z);

        let at = |x, y, z| self.get(Point3::new(x, y, z));
        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

        let c00 = lerp(at(base.x, base.y, base.z), at(x1, base.y, base.z), t.x);
        let c10 = lerp(at(base.x, y1, base.z), at(x1, y1, base.z), t.x);
        let c01 = lerp(at(base.x, base.y, z1), at(x1, base.y, z1), t.x);
        let c11 = lerp(at(base.x, y1, z1), at(x1, y1, z1), t.x);

        Some(lerp(lerp(c00, c10, t.y), lerp(c01, c11, t.y), t.z))
    }

    /// Copies the `extent` block starting at `source_min` in `source` into this
    /// volume starting at `target_min`, clipping against both volumes.
    pub fn copy_region_from(
        &mut self,
        source: &DensityVolume,
        source_min: Point3<usize>,
        target_min: Point3<usize>,
        extent: Vector3<usize>,
    ) {
        let clip = |axis_extent: usize,
                    source_min: usize,
                    source_dim: usize,
                    target_min: usize,
                    target_dim: usize| {
            axis_extent
                .min(source_dim.saturating_sub(source_min))
                .min(target_dim.saturating_sub(target_min))
        };
        let extent = Vector3::new(
            clip(extent.x, source_min.x, source.dimensions.x, target_min.x, self.dimensions.x),
            clip(extent.y, source_min.y, source.dimensions.y, target_min.y, self.dimensions.y),
            clip(extent.z, source_min.z, source.dimensions.z, target_min.z, self.dimensions.z),
        );
        if extent.x == 0 {
            return;
        }

        for z in 0..extent.z {
            for y in 0..extent.y {
                let from = source.index(source_min + Vector3::new(0, y, z));
                let to = self.index(target_min + Vector3::new(0, y, z));
                self.samples[to..to + extent.x]
                    .copy_from_slice(&source.samples[from..from + extent.x]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp() -> DensityVolume {
        DensityVolume::from_fn(Vector3::new(4, 4, 4), |p| p.y as f32 / 3.0)
    }

    #[test]
    fn trilinear_matches_samples_at_grid_points() {
        let volume = ramp();

        assert_abs_diff_eq!(
            volume.sample_trilinear(Point3::new(1.0, 2.0, 3.0)).unwrap(),
            2.0 / 3.0
        );
        assert_abs_diff_eq!(volume.sample_trilinear(Point3::new(3.0, 3.0, 3.0)).unwrap(), 1.0);
    }

    #[test]
    fn trilinear_interpolates_between_samples() {
        let volume = ramp();

        let value = volume.sample_trilinear(Point3::new(0.5, 1.5, 2.25)).unwrap();

        assert_abs_diff_eq!(value, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn trilinear_rejects_outside_positions() {
        let volume = ramp();

        assert!(volume.sample_trilinear(Point3::new(-0.1, 1.0, 1.0)).is_none());
        assert!(volume.sample_trilinear(Point3::new(1.0, 3.01, 1.0)).is_none());
    }

    #[test]
    fn gradient_points_toward_open_space() {
        let volume = ramp();

        let gradient = volume.gradient(Point3::new(1, 1, 1));
        assert_abs_diff_eq!(gradient.y, 1.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(gradient.x, 0.0);

        let border = volume.normal(Point3::new(0, 0, 0));
        assert_abs_diff_eq!(border.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn copy_region_clips_to_target() {
        let source = DensityVolume::filled(Vector3::new(3, 3, 3), 1.0);
        let mut target = DensityVolume::filled(Vector3::new(4, 4, 4), 0.0);

        target.copy_region_from(
            &source,
            Point3::new(0, 0, 0),
            Point3::new(2, 2, 2),
            Vector3::new(3, 3, 3),
        );

        assert_eq!(target.samples().iter().filter(|s| **s == 1.0).count(), 8);
        assert_eq!(target.get(Point3::new(3, 3, 3)), 1.0);
        assert_eq!(target.get(Point3::new(1, 2, 2)), 0.0);
    }
}
