//! Multi-source flood fill producing a per-voxel direction field.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use cgmath::{InnerSpace, Point3, Vector3};
use web_time::Instant;

use super::combined::CombinedDensityVolume;
use crate::terrain_state::compute::{ComputeContext, PingPong};
use crate::terrain_state::config::TerrainConfig;
use crate::terrain_state::density::{CENTER_NEIGHBOUR, NEIGHBOUR_OFFSETS};

const UNVISITED: u8 = 0;
const SEED: u8 = CENTER_NEIGHBOUR as u8 + 1;

/// Direction toward the seed region for every voxel of the combined volume.
///
/// Each voxel stores a code: `0` when unvisited, otherwise one more than the
/// index in [`NEIGHBOUR_OFFSETS`] of the step toward its parent. Seeds point at
/// themselves.
#[derive(Debug)]
pub struct FlowField {
    origin: Point3<i32>,
    dimensions: Vector3<usize>,
    codes: Vec<AtomicU8>,
}

impl Default for FlowField {
    fn default() -> Self {
        Self {
            origin: Point3::new(0, 0, 0),
            dimensions: Vector3::new(0, 0, 0),
            codes: Vec::new(),
        }
    }
}

impl FlowField {
    pub fn origin(&self) -> Point3<i32> {
        self.origin
    }

    pub fn dimensions(&self) -> Vector3<usize> {
        self.dimensions
    }

    /// Offset from the voxel at `local` to its parent, `(0, 0, 0)` for seeds.
    /// `None` for unvisited or out-of-field voxels.
    pub fn parent_offset(&self, local: Point3<i32>) -> Option<Vector3<i32>> {
        let code = self.codes[self.index(local)?].load(Ordering::Relaxed);
        (code != UNVISITED).then(|| NEIGHBOUR_OFFSETS[code as usize - 1])
    }

    pub fn is_visited(&self, local: Point3<i32>) -> bool {
        self.parent_offset(local).is_some()
    }

    pub fn is_seed(&self, local: Point3<i32>) -> bool {
        self.index(local)
            .is_some_and(|index| self.codes[index].load(Ordering::Relaxed) == SEED)
    }

    pub fn visited_count(&self) -> usize {
        self.codes
            .iter()
            .filter(|code| code.load(Ordering::Relaxed) != UNVISITED)
            .count()
    }

    /// Normalized movement direction at `world`.
    ///
    /// The position is floored to the voxel containing it. Voxels outside the
    /// field, unvisited voxels and seeds yield a zero vector.
    pub fn sample(&self, world: Point3<f32>) -> Vector3<f32> {
        let zero = Vector3::new(0.0, 0.0, 0.0);
        if !(world.x.is_finite() && world.y.is_finite() && world.z.is_finite()) {
            return zero;
        }
        let local = Point3::new(
            (world.x - self.origin.x as f32).floor() as i32,
            (world.y - self.origin.y as f32).floor() as i32,
            (world.z - self.origin.z as f32).floor() as i32,
        );
        match self.parent_offset(local) {
            Some(offset) if offset != Vector3::new(0, 0, 0) => {
                Vector3::new(offset.x as f32, offset.y as f32, offset.z as f32).normalize()
            }
            _ => zero,
        }
    }

    fn index(&self, local: Point3<i32>) -> Option<usize> {
        let inside = local.x >= 0
            && local.y >= 0
            && local.z >= 0
            && (local.x as usize) < self.dimensions.x
            && (local.y as usize) < self.dimensions.y
            && (local.z as usize) < self.dimensions.z;
        inside.then(|| {
            local.x as usize
                + self.dimensions.x * (local.y as usize + self.dimensions.y * local.z as usize)
        })
    }

    /// Marks the voxel at `index` visited with `code` unless another invocation
    /// got there first.
    fn claim(&self, index: usize, code: u8) -> bool {
        self.codes[index]
            .compare_exchange(UNVISITED, code, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Clears every code, resizing the field to match the combined volume.
    fn reset(&mut self, compute: &ComputeContext, origin: Point3<i32>, dimensions: Vector3<usize>) {
        self.origin = origin;
        if self.dimensions != dimensions {
            self.dimensions = dimensions;
            self.codes = (0..dimensions.x * dimensions.y * dimensions.z)
                .map(|_| AtomicU8::new(UNVISITED))
                .collect();
            return;
        }
        compute.dispatch_items(&self.codes, |_, code| code.store(UNVISITED, Ordering::Relaxed));
    }
}

/// Outcome of one flood fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FloodFillStats {
    pub seeds: usize,
    /// Voxels reached, seeds included
    pub visited: usize,
    pub iterations: usize,
    /// Whether the iteration cap stopped the fill early
    pub exhausted: bool,
}

/// Runs the flood fill over a [`CombinedDensityVolume`].
pub struct FlowFieldGenerator {
    compute: Arc<ComputeContext>,
    iso_level: f32,
    open_margin: f32,
    iteration_cap: usize,
    frontier: PingPong<Point3<i32>>,
}

impl FlowFieldGenerator {
    pub fn new(compute: Arc<ComputeContext>, config: &TerrainConfig) -> Self {
        Self {
            compute,
            iso_level: config.iso_level,
            open_margin: config.open_margin,
            iteration_cap: config.flood_fill_iteration_cap,
            frontier: PingPong::with_capacity(0),
        }
    }

    /// Rebuilds `field` so every open voxel connected to `target` points one
    /// step closer to it.
    ///
    /// Seeds are the open voxels of the 27-neighbourhood around the voxel
    /// nearest `target`. Each iteration consumes the current frontier and
    /// appends the newly reached voxels, one readback per iteration.
    ///
    /// # Arguments
    /// * `field` - Field to overwrite; resized to the combined volume
    /// * `density` - The combined density the fill runs over
    /// * `target` - World position the field leads toward
    pub fn regenerate(
        &mut self,
        field: &mut FlowField,
        density: &CombinedDensityVolume,
        target: Point3<f32>,
    ) -> FloodFillStats {
        let started = Instant::now();
        let dimensions = density.dimensions();
        field.reset(&self.compute, density.origin(), dimensions);

        let voxel_count = dimensions.x * dimensions.y * dimensions.z;
        if self.frontier.consume_mut().capacity() < voxel_count {
            self.frontier = PingPong::with_capacity(voxel_count);
        } else {
            self.frontier.reset();
        }

        let center = Point3::new(
            (target.x - density.origin().x as f32).round() as i32,
            (target.y - density.origin().y as f32).round() as i32,
            (target.z - density.origin().z as f32).round() as i32,
        );
        let volume = density.volume();
        let (iso_level, open_margin) = (self.iso_level, self.open_margin);
        let is_open = move |value: f32| value > iso_level && value < iso_level + open_margin;

        let mut stats = FloodFillStats::default();
        {
            let (consume, _) = self.frontier.split();
            for offset in NEIGHBOUR_OFFSETS {
                let voxel = center + offset;
                let Some(index) = field.index(voxel) else {
                    continue;
                };
                let open = volume.try_get(voxel).is_some_and(is_open);
                if open && field.claim(index, SEED) {
                    consume.append(voxel);
                    stats.seeds += 1;
                }
            }
        }
        if stats.seeds == 0 {
            log::warn!("Flow field target {:?} has no open voxel around it", target);
            return stats;
        }
        stats.visited = stats.seeds;

        let field_ref = &*field;
        let mut pending = stats.seeds;
        while pending > 0 {
            if stats.iterations >= self.iteration_cap {
                log::warn!(
                    "Flow field generation stopped after {} iterations with {} voxels pending",
                    stats.iterations,
                    pending
                );
                stats.exhausted = true;
                break;
            }

            let (consume, append) = self.frontier.split();
            let frontier: &[Point3<i32>] = consume.items_mut();
            self.compute.dispatch_items(frontier, |_, voxel| {
                for (neighbour, offset) in NEIGHBOUR_OFFSETS.iter().enumerate() {
                    if neighbour == CENTER_NEIGHBOUR {
                        continue;
                    }
                    let next = *voxel + *offset;
                    let Some(index) = field_ref.index(next) else {
                        continue;
                    };
                    let open = volume.try_get(next).is_some_and(is_open);
                    // The opposite offset of entry `i` is entry `26 - i`.
                    let toward_parent = (NEIGHBOUR_OFFSETS.len() - 1 - neighbour) as u8 + 1;
                    if open && field_ref.claim(index, toward_parent) {
                        append.append(next);
                    }
                }
            });

            pending = self.compute.readback(append);
            self.frontier.swap();
            stats.iterations += 1;
            stats.visited += pending;
        }

        log::debug!(
            "Flow field: {} voxels from {} seeds in {} iterations ({:?})",
            stats.visited,
            stats.seeds,
            stats.iterations,
            started.elapsed()
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_state::chunks::ChunkGrid;
    use crate::terrain_state::density::{DensityGenerator, DensitySource, VerticalBand};
    use approx::assert_abs_diff_eq;

    const OPEN: f32 = 0.7;
    const SOLID: f32 = 0.1;

    fn config() -> TerrainConfig {
        TerrainConfig {
            chunk_size: 8,
            amount_chunks_horizontal: 3,
            amount_chunks_vertical: 2,
            boundary_thickness: 0.0,
            amount_decorations_per_chunk: 0,
            ..TerrainConfig::default()
        }
    }

    /// Open cave split by a wall at x = 10 with a single gap near z = 2, plus a
    /// sealed pocket around (18, 3, 18).
    fn cave(world: Point3<f32>) -> f32 {
        let wall = (world.x - 10.0).abs() < 0.5 && !(world.z < 3.5 && world.y < 4.5);
        let shell = (world - Point3::new(18.0, 3.0, 18.0)).magnitude();
        let pocket_wall = (1.5..3.5).contains(&shell);
        if wall || pocket_wall || world.y < 1.0 {
            SOLID
        } else {
            OPEN
        }
    }

    fn combined(config: &TerrainConfig) -> CombinedDensityVolume {
        let generator = DensityGenerator::new(
            Arc::new(cave),
            VerticalBand::from_config(config),
            config.effective_chunk_size(),
        );
        let grid = ChunkGrid::new(config, Arc::new(ComputeContext::new(2).unwrap()), generator);
        CombinedDensityVolume::assemble(&grid, Vector3::new(1, 0, 1))
    }

    fn generate(target: Point3<f32>) -> (FlowField, CombinedDensityVolume, FloodFillStats) {
        let config = config();
        let density = combined(&config);
        let compute = Arc::new(ComputeContext::new(2).unwrap());
        let mut generator = FlowFieldGenerator::new(compute, &config);
        let mut field = FlowField::default();
        let stats = generator.regenerate(&mut field, &density, target);
        (field, density, stats)
    }

    #[test]
    fn every_visited_voxel_leads_through_open_voxels_to_a_seed() {
        let (field, density, stats) = generate(Point3::new(4.0, 5.0, 12.0));
        let dimensions = field.dimensions();
        assert!(stats.seeds > 0);
        assert!(!stats.exhausted);
        assert_eq!(field.visited_count(), stats.visited);

        for z in 0..dimensions.z as i32 {
            for y in 0..dimensions.y as i32 {
                for x in 0..dimensions.x as i32 {
                    let mut voxel = Point3::new(x, y, z);
                    if !field.is_visited(voxel) {
                        continue;
                    }
                    let mut steps = 0;
                    while !field.is_seed(voxel) {
                        voxel = voxel + field.parent_offset(voxel).unwrap();
                        let value = density.volume().try_get(voxel).unwrap();
                        assert!(value > 0.5 && value < 0.9, "stepped into solid at {voxel:?}");
                        steps += 1;
                        assert!(steps <= stats.iterations);
                    }
                }
            }
        }
    }

    #[test]
    fn fill_passes_through_the_gap_but_not_into_sealed_pockets() {
        let (field, density, _) = generate(Point3::new(4.0, 5.0, 12.0));
        let local = |world: Point3<i32>| {
            let offset = world - density.origin();
            Point3::new(offset.x, offset.y, offset.z)
        };

        assert!(field.is_visited(local(Point3::new(15, 6, 12))));
        assert!(!field.is_visited(local(Point3::new(18, 3, 18))));
        assert!(!field.is_visited(local(Point3::new(10, 6, 12))));
    }

    #[test]
    fn sample_points_toward_the_target() {
        let (field, density, _) = generate(Point3::new(4.0, 5.0, 12.0));
        let origin = density.origin();

        let direction = field.sample(Point3::new(
            origin.x as f32 + 4.2,
            origin.y as f32 + 5.3,
            origin.z as f32 + 16.5,
        ));

        assert_abs_diff_eq!(direction.magnitude(), 1.0, epsilon = 1e-5);
        assert!(direction.z < 0.0);
        assert_eq!(field.sample(Point3::new(-100.0, 5.0, 5.0)), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(field.sample(Point3::new(18.0, 3.0, 18.0)), Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn target_outside_the_field_produces_an_empty_field() {
        let (field, _, stats) = generate(Point3::new(-50.0, 5.0, 5.0));

        assert_eq!(stats.seeds, 0);
        assert_eq!(field.visited_count(), 0);
    }

    #[test]
    fn iteration_cap_stops_the_fill() {
        let config = TerrainConfig {
            flood_fill_iteration_cap: 2,
            ..config()
        };
        let density = combined(&config);
        let compute = Arc::new(ComputeContext::new(1).unwrap());
        let mut generator = FlowFieldGenerator::new(compute, &config);
        let mut field = FlowField::default();

        let stats = generator.regenerate(&mut field, &density, Point3::new(4.0, 5.0, 12.0));

        assert!(stats.exhausted);
        assert_eq!(stats.iterations, 2);
    }

    #[test]
    fn regenerating_reuses_the_field() {
        let config = config();
        let density = combined(&config);
        let compute = Arc::new(ComputeContext::new(2).unwrap());
        let mut generator = FlowFieldGenerator::new(compute, &config);
        let mut field = FlowField::default();

        let first = generator.regenerate(&mut field, &density, Point3::new(4.0, 5.0, 12.0));
        let second = generator.regenerate(&mut field, &density, Point3::new(4.0, 5.0, 12.0));

        assert_eq!(first.visited, second.visited);
        assert_eq!(field.visited_count(), second.visited);
        assert!(density.density_at_voxel(density.origin()).is_some());
    }
}
