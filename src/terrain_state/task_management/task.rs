//! # Task System Core Traits
//!
//! ## Core Components
//! - `Task`: a unit of work executed on a worker thread
//! - `TaskResult`: what the task hands back to the owning thread
//!
//! ## Task Lifecycle
//! 1. A `Task` is published via `TaskManager::publish_task()`
//! 2. Its `process()` method runs on a worker thread
//! 3. The returned `TaskResult` travels back through the worker's result channel
//! 4. `handle_result()` runs on the owning thread with mutable access to the
//!    manager's context, and may return follow-up tasks
//!
//! Both traits are `Send`: tasks and results cross threads and must own their
//! data. The context `C` never leaves the owning thread.

/// A unit of work executed off the owning thread.
///
/// Tasks should own everything they read (snapshots rather than references into
/// live state), so the owning thread can keep mutating while they run.
pub trait Task<C>: Send {
    /// Performs the work and returns the result to deliver.
    fn process(&self) -> Box<dyn TaskResult<C> + Send>;
}

/// The outcome of a [`Task`], delivered on the owning thread.
pub trait TaskResult<C>: Send {
    /// Applies the result to `context`.
    ///
    /// # Returns
    /// Follow-up tasks to publish; usually empty.
    fn handle_result(self: Box<Self>, context: &mut C) -> Vec<Box<dyn Task<C> + Send>>;
}
