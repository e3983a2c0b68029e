//! # Task Management System
//!
//! Runs work on dedicated worker threads and hands the results back to the
//! thread that owns the terrain, which drains them once per tick.
//!
//! ## Architecture Overview
//! - `TaskManager`: owns the workers, distributes tasks and collects results
//! - `Task`: a unit of work that owns its inputs
//! - `TaskResult`: the outcome, applied to the manager's context on the owning
//!   thread and able to spawn follow-up tasks
//! - `TaskChannel`: the request/result channel pair of one worker
//!
//! ## Task Lifecycle
//! 1. Tasks are published via `TaskManager::publish_task()`
//! 2. The manager hands them to free workers round-robin, queueing the rest
//! 3. Workers process tasks and send results back through their channel
//! 4. `process_completed_tasks()` applies results on the owning thread
//! 5. `process_queued_tasks()` moves queued tasks to workers that freed up
//!
//! ## Performance Considerations
//! - Each worker holds at most `MAX_TASKS_IN_FLIGHT` tasks, so a long task
//!   never delays work that another worker could pick up
//! - Tasks must own their data; nothing is shared with workers except through
//!   the channels

pub mod task;

use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

pub use task::{Task, TaskResult};

/// The request and result channels of one worker thread.
#[derive(Debug)]
pub struct TaskChannel<C> {
    task_sender: Sender<Box<dyn Task<C> + Send>>,
    result_receiver: Receiver<Box<dyn TaskResult<C> + Send>>,
    num_tasks_in_flight: usize,
    disconnected: bool,
    _worker: JoinHandle<()>,
}

/// Worker pool delivering results into a context of type `C`.
///
/// Dropping the manager closes every task channel, which ends the workers once
/// their current task finishes.
pub struct TaskManager<C> {
    channels: Vec<TaskChannel<C>>,
    queued_tasks: VecDeque<Box<dyn Task<C> + Send>>,
    current_channel: usize,
}

/// Maximum number of tasks that can be in flight per worker channel.
pub const MAX_TASKS_IN_FLIGHT: usize = 1;

impl<C: 'static> TaskManager<C> {
    /// Spawns `num_workers` named worker threads.
    ///
    /// # Arguments
    /// * `num_workers` - Worker threads to create. With zero workers every task
    ///   stays queued.
    /// * `name` - Prefix of the worker thread names
    pub fn new(num_workers: usize, name: &str) -> io::Result<Self> {
        let mut channels = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let (task_tx, task_rx) = channel::<Box<dyn Task<C> + Send>>();
            let (result_tx, result_rx) = channel::<Box<dyn TaskResult<C> + Send>>();

            let worker = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        if result_tx.send(task.process()).is_err() {
                            break;
                        }
                    }
                })?;

            channels.push(TaskChannel {
                task_sender: task_tx,
                result_receiver: result_rx,
                num_tasks_in_flight: 0,
                disconnected: false,
                _worker: worker,
            });
        }

        log::info!("Started {num_workers} {name} workers");

        Ok(TaskManager {
            channels,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
        })
    }

    /// Tasks waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.queued_tasks.len()
    }

    /// Tasks handed to workers whose results have not been processed yet.
    pub fn in_flight_count(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.num_tasks_in_flight)
            .sum()
    }

    pub fn is_idle(&self) -> bool {
        self.queued_tasks.is_empty() && self.in_flight_count() == 0
    }

    /// Attempts to send a task to a specific worker channel.
    ///
    /// # Returns
    /// - `Ok(())` if the task was handed to the worker
    /// - `Err(task)` if the worker is gone, so the caller can requeue it
    fn try_send_task(
        &mut self,
        task: Box<dyn Task<C> + Send>,
        channel_idx: usize,
    ) -> Result<(), Box<dyn Task<C> + Send>> {
        let channel = &mut self.channels[channel_idx];
        match channel.task_sender.send(task) {
            Ok(()) => {
                channel.num_tasks_in_flight += 1;
                Ok(())
            }
            Err(error) => {
                if !channel.disconnected {
                    log::error!("Worker channel {channel_idx} disconnected");
                    channel.disconnected = true;
                }
                Err(error.0)
            }
        }
    }

    /// Finds the next channel, round-robin from the last used one, that can
    /// take another task.
    fn find_available_channel(&self) -> Option<usize> {
        let count = self.channels.len();
        (0..count)
            .map(|offset| (self.current_channel + offset) % count)
            .find(|&index| {
                let channel = &self.channels[index];
                !channel.disconnected && channel.num_tasks_in_flight < MAX_TASKS_IN_FLIGHT
            })
    }

    /// Publishes a task for execution.
    ///
    /// # Returns
    /// - `true` if the task went straight to a worker
    /// - `false` if it was queued because every worker is busy
    pub fn publish_task(&mut self, task: Box<dyn Task<C> + Send>) -> bool {
        let Some(channel_idx) = self.find_available_channel() else {
            self.queued_tasks.push_back(task);
            return false;
        };

        match self.try_send_task(task, channel_idx) {
            Ok(()) => {
                self.current_channel = (channel_idx + 1) % self.channels.len();
                true
            }
            Err(task) => {
                self.queued_tasks.push_back(task);
                false
            }
        }
    }

    /// Moves queued tasks, oldest first, to workers that have capacity.
    pub fn process_queued_tasks(&mut self) {
        while let Some(channel_idx) = self.find_available_channel() {
            let Some(task) = self.queued_tasks.pop_front() else {
                break;
            };
            match self.try_send_task(task, channel_idx) {
                Ok(()) => self.current_channel = (channel_idx + 1) % self.channels.len(),
                Err(task) => {
                    self.queued_tasks.push_front(task);
                }
            }
        }
    }

    /// Applies every result the workers have finished to `context`.
    ///
    /// Follow-up tasks returned by results are published afterwards.
    ///
    /// # Returns
    /// The number of results handled.
    pub fn process_completed_tasks(&mut self, context: &mut C) -> usize {
        let mut tasks_to_queue = Vec::new();
        let mut handled = 0;

        for (index, channel) in self.channels.iter_mut().enumerate() {
            loop {
                match channel.result_receiver.try_recv() {
                    Ok(result) => {
                        channel.num_tasks_in_flight = channel.num_tasks_in_flight.saturating_sub(1);
                        tasks_to_queue.extend(result.handle_result(context));
                        handled += 1;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !channel.disconnected {
                            log::error!(
                                "Worker channel {index} disconnected with {} tasks in flight",
                                channel.num_tasks_in_flight
                            );
                            channel.disconnected = true;
                        }
                        channel.num_tasks_in_flight = 0;
                        break;
                    }
                }
            }
        }

        for task in tasks_to_queue {
            self.publish_task(task);
        }
        handled
    }
}
