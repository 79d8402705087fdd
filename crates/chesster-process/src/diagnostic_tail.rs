use std::sync::{Arc, Mutex};

/// Characters of stderr retained for error messages.
pub const DEFAULT_DIAGNOSTIC_TAIL_CHARS: usize = 500;

/// Bounded, shareable tail of a child's error stream.
///
/// Only the most recent `capacity` characters are kept; older text is dropped
/// from the front so the tail always reflects what the child said last.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    inner: Arc<Mutex<String>>,
    capacity: usize,
}

impl Default for DiagnosticTail {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DIAGNOSTIC_TAIL_CHARS)
    }
}

impl DiagnosticTail {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(String::new())),
            capacity: capacity.max(1),
        }
    }

    /// Appends one line (a newline separator is inserted between lines).
    pub fn push_line(&self, line: &str) {
        let mut tail = lock_unpoisoned(&self.inner);
        if !tail.is_empty() {
            tail.push('\n');
        }
        tail.push_str(line);
        let excess = tail.chars().count().saturating_sub(self.capacity);
        if excess > 0 {
            let cut = tail
                .char_indices()
                .nth(excess)
                .map(|(index, _)| index)
                .unwrap_or(tail.len());
            tail.drain(..cut);
        }
    }

    pub fn snapshot(&self) -> String {
        lock_unpoisoned(&self.inner).clone()
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.inner).clear();
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
