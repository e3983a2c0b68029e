//! # Asynchronous Path Requests
//!
//! Runs [`find_path`] on background workers through the generic
//! [`TaskManager`]. Each request captures a [`DensitySnapshot`] of the window,
//! so carving and window sliding can continue on the owning thread while the
//! search runs against the density as it was when the request was made.
//!
//! ## Key Components
//! - `PathTask`: one search, owning its snapshot and parameters
//! - `PathResult`: the waypoints or failure of one search
//! - `PathCompletions`: the callbacks waiting for results, only ever touched on
//!   the owning thread
//! - `Pathfinder`: issues request ids and drains results once per tick
//!
//! Requests cannot be cancelled. Every published request produces exactly one
//! callback invocation, success or failure, during some later [`Pathfinder::process`].

mod search;

use std::collections::HashMap;
use std::io;

use cgmath::Point3;

pub use search::{find_path, PathFailure, PathParams};

use super::chunks::DensitySnapshot;
use super::task_management::{Task, TaskManager, TaskResult};

/// Outcome handed to a path callback.
pub type PathOutcome = Result<Vec<Point3<i32>>, PathFailure>;

/// Callback invoked on the owning thread once a request resolves.
pub type PathCallback = Box<dyn FnOnce(PathOutcome)>;

/// Callbacks of the requests still in flight, keyed by request id.
#[derive(Default)]
pub struct PathCompletions {
    callbacks: HashMap<u64, PathCallback>,
    delivered: usize,
}

impl PathCompletions {
    pub fn pending(&self) -> usize {
        self.callbacks.len()
    }

    /// Results delivered since creation.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

/// A search request travelling to a worker.
pub struct PathTask {
    id: u64,
    snapshot: DensitySnapshot,
    start: Point3<f32>,
    goal: Point3<f32>,
    params: PathParams,
}

impl Task<PathCompletions> for PathTask {
    fn process(&self) -> Box<dyn TaskResult<PathCompletions> + Send> {
        let outcome = find_path(&self.snapshot, self.start, self.goal, &self.params);
        Box::new(PathResult { id: self.id, outcome })
    }
}

/// A finished search travelling back to the owning thread.
pub struct PathResult {
    id: u64,
    outcome: PathOutcome,
}

impl TaskResult<PathCompletions> for PathResult {
    fn handle_result(
        self: Box<Self>,
        context: &mut PathCompletions,
    ) -> Vec<Box<dyn Task<PathCompletions> + Send>> {
        match &self.outcome {
            Ok(path) => {
                log::debug!("Path request {} resolved with {} waypoints", self.id, path.len())
            }
            Err(failure) => log::debug!("Path request {} failed: {}", self.id, failure),
        }

        match context.callbacks.remove(&self.id) {
            Some(callback) => {
                callback(self.outcome);
                context.delivered += 1;
            }
            None => log::warn!("No callback registered for path request {}", self.id),
        }
        Vec::new()
    }
}

/// Front end of the background path search.
pub struct Pathfinder {
    tasks: TaskManager<PathCompletions>,
    completions: PathCompletions,
    params: PathParams,
    next_id: u64,
}

impl Pathfinder {
    /// Starts `workers` search threads.
    ///
    /// # Errors
    /// Fails when a worker thread cannot be spawned.
    pub fn new(workers: usize, params: PathParams) -> io::Result<Self> {
        Ok(Self {
            tasks: TaskManager::new(workers, "pathfinder")?,
            completions: PathCompletions::default(),
            params,
            next_id: 0,
        })
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Queues a search from `start` to `goal` over `snapshot`.
    ///
    /// # Arguments
    /// * `snapshot` - Density the search reads; later terrain edits are not seen
    /// * `callback` - Invoked with the result during a later [`process`](Self::process)
    ///
    /// # Returns
    /// The id of the request.
    pub fn request_path(
        &mut self,
        snapshot: DensitySnapshot,
        start: Point3<f32>,
        goal: Point3<f32>,
        callback: impl FnOnce(PathOutcome) + 'static,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.completions.callbacks.insert(id, Box::new(callback));
        let dispatched = self.tasks.publish_task(Box::new(PathTask {
            id,
            snapshot,
            start,
            goal,
            params: self.params,
        }));
        log::debug!(
            "Path request {id} from {:?} to {:?} {}",
            start,
            goal,
            if dispatched { "dispatched" } else { "queued" }
        );
        id
    }

    /// Delivers finished results to their callbacks and hands queued requests
    /// to idle workers. Call once per tick.
    ///
    /// # Returns
    /// The number of callbacks invoked.
    pub fn process(&mut self) -> usize {
        let delivered = self.tasks.process_completed_tasks(&mut self.completions);
        self.tasks.process_queued_tasks();
        delivered
    }

    /// Requests whose callback has not run yet.
    pub fn pending(&self) -> usize {
        self.completions.pending()
    }

    pub fn delivered(&self) -> usize {
        self.completions.delivered()
    }
}
