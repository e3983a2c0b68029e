//! Append buffers and their double-buffered pairing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A fixed-capacity output buffer written concurrently by kernel invocations.
///
/// Appends reserve a slot by bumping an atomic counter; once the counter reaches
/// the capacity further appends are dropped and counted as overflow, mirroring a
/// structured append buffer whose counter saturates.
#[derive(Debug)]
pub struct AppendBuffer<T> {
    items: Mutex<Vec<T>>,
    counter: AtomicUsize,
    overflow: AtomicUsize,
    capacity: usize,
}

impl<T> AppendBuffer<T> {
    /// Creates an empty buffer accepting at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
            capacity,
        }
    }

    /// The maximum number of items the buffer accepts between resets.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends one item, returning `false` when the buffer is full.
    pub fn append(&self, item: T) -> bool {
        if self.reserve(1) == 0 {
            return false;
        }
        self.lock().push(item);
        true
    }

    /// Appends a batch produced by a single invocation under one lock.
    ///
    /// Returns how many of the items were accepted.
    pub fn append_all<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        let wanted = items.len();
        if wanted == 0 {
            return 0;
        }

        let granted = self.reserve(wanted);
        if granted > 0 {
            self.lock().extend(items.take(granted));
        }
        granted
    }

    /// Current value of the counter. Prefer `ComputeContext::readback`, which
    /// records the synchronization point.
    pub fn count(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    /// Number of items dropped because the buffer was full since the last reset.
    pub fn overflow(&self) -> usize {
        self.overflow.load(Ordering::Acquire)
    }

    /// Resets the counter to zero and clears the contents, keeping the allocation.
    pub fn reset(&mut self) {
        self.items_mut().clear();
        *self.counter.get_mut() = 0;
        *self.overflow.get_mut() = 0;
    }

    /// Exclusive access to the appended items.
    pub fn items_mut(&mut self) -> &mut Vec<T> {
        self.items
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes the buffer, returning the appended items.
    pub fn into_vec(self) -> Vec<T> {
        self.items
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self, wanted: usize) -> usize {
        let mut granted = 0;
        let _ = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                granted = wanted.min(self.capacity.saturating_sub(count));
                (granted > 0).then_some(count + granted)
            });

        if granted < wanted {
            self.overflow.fetch_add(wanted - granted, Ordering::Relaxed);
        }
        granted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Two append buffers whose roles alternate between iterations.
///
/// One buffer is consumed (read as the current frontier) while the other is
/// appended to (the next frontier); [`PingPong::swap`] flips the roles so no
/// iteration ever reads the buffer it writes.
#[derive(Debug)]
pub struct PingPong<T> {
    ping: AppendBuffer<T>,
    pong: AppendBuffer<T>,
    should_ping: bool,
}

impl<T> PingPong<T> {
    /// Creates a pair of buffers of `capacity` items each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ping: AppendBuffer::with_capacity(capacity),
            pong: AppendBuffer::with_capacity(capacity),
            should_ping: true,
        }
    }

    /// Clears both buffers and restores the initial phase.
    pub fn reset(&mut self) {
        self.ping.reset();
        self.pong.reset();
        self.should_ping = true;
    }

    /// Splits the pair into `(consume, append)` for one iteration.
    pub fn split(&mut self) -> (&mut AppendBuffer<T>, &AppendBuffer<T>) {
        if self.should_ping {
            (&mut self.pong, &self.ping)
        } else {
            (&mut self.ping, &self.pong)
        }
    }

    /// The buffer currently being consumed.
    pub fn consume_mut(&mut self) -> &mut AppendBuffer<T> {
        self.split().0
    }

    /// Swaps roles: what was appended becomes the next consume buffer, and the
    /// old consume buffer is reset to receive the next appends.
    pub fn swap(&mut self) {
        self.consume_mut().reset();
        self.should_ping = !self.should_ping;
    }
}
