use cgmath::{Point3, Vector3};

/// A grid axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Which way the window moves along an axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShiftDirection {
    Negative,
    Positive,
}

impl ShiftDirection {
    pub fn sign(self) -> i32 {
        match self {
            ShiftDirection::Negative => -1,
            ShiftDirection::Positive => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            ShiftDirection::Negative => ShiftDirection::Positive,
            ShiftDirection::Positive => ShiftDirection::Negative,
        }
    }
}

/// Affine mapping between world space and the chunk grid.
///
/// The grid covers `[bounds_min, bounds_max]` with
/// `bounds_max - bounds_min == dimensions * step` on every axis. Neighbouring
/// chunks are `step` apart and share their boundary sample layer, so a chunk
/// holds `step + 1` samples per edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridMapping {
    voxel_origin: Point3<i32>,
    dimensions: Vector3<usize>,
    step: i32,
}

impl GridMapping {
    pub fn new(voxel_origin: Point3<i32>, dimensions: Vector3<usize>, step: i32) -> Self {
        Self {
            voxel_origin,
            dimensions,
            step,
        }
    }

    pub fn dimensions(&self) -> Vector3<usize> {
        self.dimensions
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn voxel_origin(&self) -> Point3<i32> {
        self.voxel_origin
    }

    pub fn chunk_count(&self) -> usize {
        self.dimensions.x * self.dimensions.y * self.dimensions.z
    }

    pub fn bounds_min(&self) -> Point3<f32> {
        self.voxel_origin.map(|c| c as f32)
    }

    pub fn bounds_max(&self) -> Point3<f32> {
        self.voxel_max().map(|c| c as f32)
    }

    /// Highest voxel coordinate covered by the grid on each axis.
    pub fn voxel_max(&self) -> Point3<i32> {
        Point3::new(
            self.voxel_origin.x + self.dimensions.x as i32 * self.step,
            self.voxel_origin.y + self.dimensions.y as i32 * self.step,
            self.voxel_origin.z + self.dimensions.z as i32 * self.step,
        )
    }

    /// Remaps a world position into fractional grid coordinates.
    pub fn fractional_index(&self, world: Point3<f32>) -> Vector3<f32> {
        let min = self.bounds_min();
        let step = self.step as f32;
        Vector3::new(
            (world.x - min.x) / step,
            (world.y - min.y) / step,
            (world.z - min.z) / step,
        )
    }

    /// The chunk containing `world`, or `None` outside the grid on any axis.
    pub fn chunk_index_of(&self, world: Point3<f32>) -> Option<Vector3<usize>> {
        let fractional = self.fractional_index(world);
        let axis = |f: f32, extent: usize| -> Option<usize> {
            (f >= 0.0 && f < extent as f32).then(|| f as usize)
        };
        Some(Vector3::new(
            axis(fractional.x, self.dimensions.x)?,
            axis(fractional.y, self.dimensions.y)?,
            axis(fractional.z, self.dimensions.z)?,
        ))
    }

    /// World-space origin of the chunk in slot `index`.
    pub fn chunk_origin(&self, index: Vector3<usize>) -> Point3<i32> {
        Point3::new(
            self.voxel_origin.x + index.x as i32 * self.step,
            self.voxel_origin.y + index.y as i32 * self.step,
            self.voxel_origin.z + index.z as i32 * self.step,
        )
    }

    /// Flattened storage index of a grid slot, `i + W * (j + H * k)`.
    pub fn flat_index(&self, index: Vector3<usize>) -> usize {
        index.x + self.dimensions.x * (index.y + self.dimensions.y * index.z)
    }

    /// Inverse of [`GridMapping::flat_index`].
    pub fn grid_index(&self, flat: usize) -> Vector3<usize> {
        let x = flat % self.dimensions.x;
        let y = (flat / self.dimensions.x) % self.dimensions.y;
        let z = flat / (self.dimensions.x * self.dimensions.y);
        Vector3::new(x, y, z)
    }

    /// Resolves an integer world position to the owning chunk slot and the
    /// sample inside it.
    ///
    /// Samples on a shared boundary layer resolve to the lower chunk, except on
    /// the grid's far faces where only the last chunk holds them.
    pub fn resolve_voxel(&self, voxel: Point3<i32>) -> Option<(Vector3<usize>, Point3<usize>)> {
        let axis = |relative: i32, extent: usize| -> Option<(usize, usize)> {
            if relative < 0 || relative > extent as i32 * self.step {
                return None;
            }
            let chunk = ((relative / self.step) as usize).min(extent - 1);
            Some((chunk, (relative - chunk as i32 * self.step) as usize))
        };

        let (cx, lx) = axis(voxel.x - self.voxel_origin.x, self.dimensions.x)?;
        let (cy, ly) = axis(voxel.y - self.voxel_origin.y, self.dimensions.y)?;
        let (cz, lz) = axis(voxel.z - self.voxel_origin.z, self.dimensions.z)?;
        Some((Vector3::new(cx, cy, cz), Point3::new(lx, ly, lz)))
    }

    /// Moves the window one step along `axis`.
    pub fn shift(&mut self, axis: Axis, direction: ShiftDirection) {
        self.voxel_origin[axis.index()] += direction.sign() * self.step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn mapping() -> GridMapping {
        GridMapping::new(Point3::new(-10, 0, 5), Vector3::new(5, 2, 5), 7)
    }

    #[test]
    fn chunk_index_truncates_fractional_coordinates() {
        let mapping = mapping();

        assert_eq!(
            mapping.chunk_index_of(Point3::new(-10.0, 0.0, 5.0)),
            Some(Vector3::new(0, 0, 0))
        );
        assert_eq!(
            mapping.chunk_index_of(Point3::new(4.5, 13.9, 39.9)),
            Some(Vector3::new(2, 1, 4))
        );
        let fractional = mapping.fractional_index(Point3::new(0.5, 3.5, 5.0));
        assert_abs_diff_eq!(fractional.x, 1.5);
        assert_abs_diff_eq!(fractional.y, 0.5);
    }

    #[test]
    fn out_of_window_positions_have_no_chunk() {
        let mapping = mapping();

        assert_eq!(mapping.chunk_index_of(Point3::new(-10.1, 1.0, 6.0)), None);
        assert_eq!(mapping.chunk_index_of(Point3::new(0.0, 14.0, 6.0)), None);
        assert_eq!(mapping.chunk_index_of(Point3::new(0.0, 1.0, 40.0)), None);
    }

    #[test]
    fn flat_index_round_trips() {
        let mapping = mapping();

        for flat in 0..mapping.chunk_count() {
            assert_eq!(mapping.flat_index(mapping.grid_index(flat)), flat);
        }
    }

    #[test]
    fn shared_layers_resolve_to_lower_chunk_except_far_face() {
        let mapping = mapping();

        let (chunk, local) = mapping.resolve_voxel(Point3::new(-3, 0, 5)).unwrap();
        assert_eq!(chunk, Vector3::new(1, 0, 0));
        assert_eq!(local, Point3::new(0, 0, 0));

        let (chunk, local) = mapping.resolve_voxel(Point3::new(25, 14, 40)).unwrap();
        assert_eq!(chunk, Vector3::new(4, 1, 4));
        assert_eq!(local, Point3::new(7, 7, 7));

        assert!(mapping.resolve_voxel(Point3::new(26, 0, 5)).is_none());
        assert!(mapping.resolve_voxel(Point3::new(0, -1, 5)).is_none());
    }

    #[test]
    fn shifting_keeps_extent() {
        let mut mapping = mapping();
        let extent = mapping.bounds_max() - mapping.bounds_min();

        mapping.shift(Axis::X, ShiftDirection::Positive);
        mapping.shift(Axis::Z, ShiftDirection::Negative);

        assert_eq!(mapping.bounds_max() - mapping.bounds_min(), extent);
        assert_eq!(mapping.voxel_origin(), Point3::new(-3, 0, -2));
    }
}
