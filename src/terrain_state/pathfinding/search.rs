//! A* over the 26-connected voxel grid of a [`DensitySource`].

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};

use bitvec::prelude::*;
use cgmath::{MetricSpace, Point3, Vector3};
use thiserror::Error;

use crate::terrain_state::config::TerrainConfig;
use crate::terrain_state::density::{DensitySource, CENTER_NEIGHBOUR, NEIGHBOUR_OFFSETS};

/// Why a path request produced no path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFailure {
    #[error("start position is not in open terrain")]
    InvalidStart,
    #[error("goal position is not in open terrain")]
    InvalidGoal,
    #[error("no path found within {expansions} expansions")]
    Exhausted { expansions: usize },
    #[error("start and goal are not connected through open terrain")]
    NoRoute,
    #[error("path endpoint lies outside the loaded terrain")]
    OutsideWindow,
}

/// Search constants, usually taken from the [`TerrainConfig`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathParams {
    pub iso_level: f32,
    pub open_margin: f32,
    /// The search succeeds once a node is strictly closer than this to the goal
    pub goal_tolerance: f32,
    /// Cost added per unit of density between a voxel and the open band's
    /// upper limit
    pub density_penalty: f32,
    pub expansion_cap: usize,
}

impl PathParams {
    pub fn from_config(config: &TerrainConfig) -> Self {
        Self {
            iso_level: config.iso_level,
            open_margin: config.open_margin,
            goal_tolerance: config.path_goal_tolerance,
            density_penalty: config.path_density_penalty,
            expansion_cap: config.path_expansion_cap,
        }
    }

    pub fn is_open(&self, density: f32) -> bool {
        density > self.iso_level && density < self.iso_level + self.open_margin
    }

    /// Extra cost of entering a voxel of `density`, largest right above the
    /// surface and vanishing deep inside open cave.
    pub fn penalty(&self, density: f32) -> f32 {
        (self.iso_level + self.open_margin - density).max(0.0) * self.density_penalty
    }
}

#[derive(Clone, Copy, Debug)]
struct OpenNode {
    f_score: f32,
    g_score: f32,
    slot: usize,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    /// Reversed so the max-heap pops the lowest `f`, preferring deeper nodes on
    /// ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| self.g_score.total_cmp(&other.g_score))
    }
}

struct NodeRecord {
    voxel: Point3<i32>,
    parent: Option<usize>,
    g_score: f32,
}

/// Finds a path from `start` to `goal` through open voxels of `source`.
///
/// Both endpoints are classified by their interpolated density first. The
/// search then runs from the voxel nearest `start`; every expansion fetches the
/// 27-neighbourhood of the current voxel through `source`, so chunk boundaries
/// need no special handling.
///
/// # Returns
/// The visited voxels from the start voxel to the first voxel within
/// `goal_tolerance` of the goal voxel, both included.
pub fn find_path<S>(
    source: &S,
    start: Point3<f32>,
    goal: Point3<f32>,
    params: &PathParams,
) -> Result<Vec<Point3<i32>>, PathFailure>
where
    S: DensitySource + ?Sized,
{
    let start_density = source.sample(start).ok_or(PathFailure::OutsideWindow)?;
    let goal_density = source.sample(goal).ok_or(PathFailure::OutsideWindow)?;
    if !params.is_open(start_density) {
        log::warn!("Path start {:?} is not open terrain (density {})", start, start_density);
        return Err(PathFailure::InvalidStart);
    }
    if !params.is_open(goal_density) {
        log::warn!("Path goal {:?} is not open terrain (density {})", goal, goal_density);
        return Err(PathFailure::InvalidGoal);
    }

    let start_voxel = start.map(|c| c.round() as i32);
    let goal_voxel = goal.map(|c| c.round() as i32);
    let goal_point = goal_voxel.map(|c| c as f32);
    let heuristic = |voxel: Point3<i32>| voxel.map(|c| c as f32).distance(goal_point);

    let (min, max) = source.voxel_bounds();
    let extent = max - min + Vector3::new(1, 1, 1);
    let flat = |voxel: Point3<i32>| -> Option<usize> {
        let local = voxel - min;
        let inside = (0..3).all(|axis| local[axis] >= 0 && local[axis] < extent[axis]);
        inside.then(|| {
            local.x as usize
                + extent.x as usize * (local.y as usize + extent.y as usize * local.z as usize)
        })
    };

    let start_index = flat(start_voxel).ok_or(PathFailure::OutsideWindow)?;
    let mut closed = bitvec![0; extent.x as usize * extent.y as usize * extent.z as usize];
    let mut records = vec![NodeRecord {
        voxel: start_voxel,
        parent: None,
        g_score: 0.0,
    }];
    let mut slots = HashMap::from([(start_index, 0usize)]);
    let mut open = BinaryHeap::from([OpenNode {
        f_score: heuristic(start_voxel),
        g_score: 0.0,
        slot: 0,
    }]);

    let mut expansions = 0;
    while let Some(node) = open.pop() {
        let current = records[node.slot].voxel;
        let Some(current_index) = flat(current) else {
            continue;
        };
        if closed[current_index] || node.g_score > records[node.slot].g_score {
            continue;
        }

        if heuristic(current) < params.goal_tolerance {
            log::debug!("Path found after {expansions} expansions");
            return Ok(reconstruct(&records, node.slot));
        }

        closed.set(current_index, true);
        expansions += 1;
        if expansions > params.expansion_cap {
            log::warn!("Path search stopped after {expansions} expansions");
            return Err(PathFailure::Exhausted { expansions });
        }

        let neighbourhood = source.neighbourhood(current);
        for (neighbour, offset) in NEIGHBOUR_OFFSETS.iter().enumerate() {
            if neighbour == CENTER_NEIGHBOUR {
                continue;
            }
            let passable = neighbourhood[neighbour].filter(|density| params.is_open(*density));
            let Some(density) = passable else {
                continue;
            };
            let next = current + *offset;
            let Some(next_index) = flat(next) else {
                continue;
            };
            if closed[next_index] {
                continue;
            }

            let step = Vector3::new(offset.x as f32, offset.y as f32, offset.z as f32);
            let g_score =
                node.g_score + cgmath::InnerSpace::magnitude(step) + params.penalty(density);

            let slot = match slots.entry(next_index) {
                Entry::Occupied(entry) => {
                    let slot = *entry.get();
                    if g_score >= records[slot].g_score {
                        continue;
                    }
                    records[slot].parent = Some(node.slot);
                    records[slot].g_score = g_score;
                    slot
                }
                Entry::Vacant(entry) => {
                    records.push(NodeRecord {
                        voxel: next,
                        parent: Some(node.slot),
                        g_score,
                    });
                    *entry.insert(records.len() - 1)
                }
            };
            open.push(OpenNode {
                f_score: g_score + heuristic(next),
                g_score,
                slot,
            });
        }
    }

    log::debug!("Path search exhausted the reachable region after {expansions} expansions");
    Err(PathFailure::NoRoute)
}

fn reconstruct(records: &[NodeRecord], last: usize) -> Vec<Point3<i32>> {
    let mut path = Vec::new();
    let mut slot = Some(last);
    while let Some(index) = slot {
        path.push(records[index].voxel);
        slot = records[index].parent;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Analytic density over an inclusive voxel box.
    struct Field<F> {
        min: Point3<i32>,
        max: Point3<i32>,
        density: F,
    }

    impl<F: Fn(Point3<i32>) -> f32> DensitySource for Field<F> {
        fn density_at_voxel(&self, voxel: Point3<i32>) -> Option<f32> {
            let inside =
                (0..3).all(|axis| voxel[axis] >= self.min[axis] && voxel[axis] <= self.max[axis]);
            inside.then(|| (self.density)(voxel))
        }

        fn voxel_bounds(&self) -> (Point3<i32>, Point3<i32>) {
            (self.min, self.max)
        }
    }

    /// Three 8-voxel chunks side by side, open everywhere.
    fn open_field() -> Field<impl Fn(Point3<i32>) -> f32> {
        Field {
            min: Point3::new(0, 0, 0),
            max: Point3::new(21, 7, 7),
            density: |_: Point3<i32>| -> f32 { 0.6 },
        }
    }

    fn exact_params() -> PathParams {
        PathParams {
            iso_level: 0.5,
            open_margin: 0.4,
            goal_tolerance: 0.5,
            density_penalty: 4.0,
            expansion_cap: 100_000,
        }
    }

    fn chebyshev(a: Point3<i32>, b: Point3<i32>) -> i32 {
        (a.x - b.x).abs().max((a.y - b.y).abs()).max((a.z - b.z).abs())
    }

    #[test]
    fn open_volume_paths_use_chebyshev_many_edges() {
        let field = open_field();

        for (start, goal) in [
            (Point3::new(1, 1, 1), Point3::new(20, 6, 3)),
            (Point3::new(2, 5, 6), Point3::new(9, 1, 0)),
            (Point3::new(18, 3, 3), Point3::new(18, 3, 6)),
        ] {
            let path = find_path(
                &field,
                start.map(|c| c as f32),
                goal.map(|c| c as f32),
                &exact_params(),
            )
            .unwrap();

            assert_eq!(path.first(), Some(&start));
            assert_eq!(path.last(), Some(&goal));
            assert_eq!(path.len() as i32 - 1, chebyshev(start, goal));
            for pair in path.windows(2) {
                assert_eq!(chebyshev(pair[0], pair[1]), 1);
            }
        }
    }

    #[test]
    fn start_at_goal_is_a_single_waypoint() {
        let path = find_path(
            &open_field(),
            Point3::new(4.2, 3.0, 3.0),
            Point3::new(3.9, 3.1, 3.0),
            &exact_params(),
        )
        .unwrap();

        assert_eq!(path, vec![Point3::new(4, 3, 3)]);
    }

    #[test]
    fn solid_endpoints_fail_before_searching() {
        let field = Field {
            min: Point3::new(0, 0, 0),
            max: Point3::new(21, 7, 7),
            density: |voxel: Point3<i32>| -> f32 { if voxel.x < 3 { 0.2 } else { 0.6 } },
        };

        let open = Point3::new(10.0, 3.0, 3.0);

        let start = find_path(&field, Point3::new(1.0, 3.0, 3.0), open, &exact_params());
        let goal = find_path(&field, open, Point3::new(0.0, 3.0, 3.0), &exact_params());

        assert_eq!(start, Err(PathFailure::InvalidStart));
        assert_eq!(goal, Err(PathFailure::InvalidGoal));
    }

    #[test]
    fn endpoints_outside_the_source_are_reported() {
        let result = find_path(
            &open_field(),
            Point3::new(-5.0, 3.0, 3.0),
            Point3::new(10.0, 3.0, 3.0),
            &exact_params(),
        );

        assert_eq!(result, Err(PathFailure::OutsideWindow));
    }

    #[test]
    fn walls_without_gaps_mean_no_route() {
        let field = Field {
            min: Point3::new(0, 0, 0),
            max: Point3::new(21, 7, 7),
            density: |voxel: Point3<i32>| -> f32 { if voxel.x == 10 { 0.1 } else { 0.6 } },
        };

        let result = find_path(
            &field,
            Point3::new(2.0, 3.0, 3.0),
            Point3::new(18.0, 3.0, 3.0),
            &exact_params(),
        );

        assert_eq!(result, Err(PathFailure::NoRoute));
    }

    #[test]
    fn paths_detour_through_gaps() {
        let field = Field {
            min: Point3::new(0, 0, 0),
            max: Point3::new(21, 7, 7),
            density: |voxel: Point3<i32>| -> f32 {
                if voxel.x == 10 && voxel.z != 7 {
                    0.1
                } else {
                    0.6
                }
            },
        };

        let path = find_path(
            &field,
            Point3::new(2.0, 3.0, 3.0),
            Point3::new(18.0, 3.0, 3.0),
            &exact_params(),
        )
        .unwrap();

        assert!(path.iter().any(|voxel| voxel.x == 10 && voxel.z == 7));
        assert!(path.iter().all(|voxel| field.density_at_voxel(*voxel) == Some(0.6)));
    }

    #[test]
    fn expansion_cap_reports_exhaustion() {
        let params = PathParams {
            expansion_cap: 3,
            ..exact_params()
        };

        let result = find_path(
            &open_field(),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(20.0, 6.0, 3.0),
            &params,
        );

        assert_eq!(result, Err(PathFailure::Exhausted { expansions: 4 }));
    }

    #[test]
    fn penalty_prefers_deeper_open_space() {
        let params = exact_params();

        assert_abs_diff_eq!(params.penalty(0.6), 1.2, epsilon = 1e-5);
        assert_abs_diff_eq!(params.penalty(0.85), 0.2, epsilon = 1e-5);
        assert!(params.is_open(0.6));
        assert!(!params.is_open(0.5));
        assert!(!params.is_open(0.95));
    }
}
