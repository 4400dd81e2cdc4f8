use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Keep the last 10k lines of server output.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Append-only record of every line the supervised process has written.
///
/// Cloning the sink yields another handle to the same buffer. Once the
/// retention capacity is reached the oldest lines are evicted and counted in
/// [`LogSink::dropped`].
#[derive(Debug, Clone)]
pub struct LogSink {
    inner: Arc<Mutex<LogSinkState>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct LogSinkState {
    lines: VecDeque<String>,
    dropped: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogSinkState::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&self, line: impl Into<String>) {
        let mut state = self.inner.lock();
        if state.lines.len() == self.capacity {
            state.lines.pop_front();
            state.dropped = state.dropped.saturating_add(1);
        }
        state.lines.push_back(line.into());
    }

    /// Copy of the retained lines in arrival order.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of lines evicted to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}
