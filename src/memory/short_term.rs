use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of lines kept per session.
pub const DEFAULT_CAPACITY: usize = 10;

/// Windows are owned by a user: the same session id under another user is
/// a different window.
type WindowKey = (String, String);

fn key(user_id: &str, session_id: &str) -> WindowKey {
    (user_id.to_string(), session_id.to_string())
}

/// Fixed-size FIFO window of recent `"sender: message"` lines per session.
///
/// A non-authoritative accelerator over durable history: it seeds routing
/// and generation context without a storage round trip. Appends evict the
/// oldest line once the capacity is exceeded.
pub struct ShortTermMemory {
    capacity: usize,
    sessions: Mutex<HashMap<WindowKey, VecDeque<String>>>,
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, VecDeque<String>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, user_id: &str, session_id: &str, line: impl Into<String>) {
        let mut sessions = self.lock();
        let lines = sessions.entry(key(user_id, session_id)).or_default();
        lines.push_back(line.into());
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// Format and append one utterance.
    pub fn append_message(&self, user_id: &str, session_id: &str, sender: &str, message: &str) {
        self.append(user_id, session_id, format!("{sender}: {message}"));
    }

    /// The most recent `n` lines, oldest first.
    pub fn recent(&self, user_id: &str, session_id: &str, n: usize) -> Vec<String> {
        match self.lock().get(&key(user_id, session_id)) {
            Some(lines) => {
                let skip = lines.len().saturating_sub(n);
                lines.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn all(&self, user_id: &str, session_id: &str) -> Vec<String> {
        self.lock()
            .get(&key(user_id, session_id))
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, user_id: &str, session_id: &str) {
        self.lock().remove(&key(user_id, session_id));
    }

    /// Drop lines spoken by `sender` from every window the user owns.
    pub fn forget_sender(&self, user_id: &str, sender: &str) {
        let prefix = format!("{sender}: ");
        for ((owner, _), lines) in self.lock().iter_mut() {
            if owner == user_id {
                lines.retain(|line| !line.starts_with(&prefix));
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
