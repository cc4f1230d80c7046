pub mod daily;
pub mod short_term;
pub mod summary;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::store::Store;
use short_term::ShortTermMemory;

/// Window size used for routing context.
pub const ROUTING_WINDOW: usize = 10;
/// Window size used for generation context.
pub const GENERATION_WINDOW: usize = 20;

/// Gathers recent conversation lines for a session.
///
/// Reads the short-term window first. When it holds fewer lines than the
/// caller needs, the most recent rows from durable history are fetched and
/// merged in front of it without repeating lines already held locally.
/// Storage failures degrade to the local lines alone.
pub struct ContextAssembler {
    short_term: Arc<ShortTermMemory>,
    store: Arc<dyn Store>,
}

impl ContextAssembler {
    pub fn new(short_term: Arc<ShortTermMemory>, store: Arc<dyn Store>) -> Self {
        Self { short_term, store }
    }

    pub fn short_term(&self) -> &Arc<ShortTermMemory> {
        &self.short_term
    }

    /// Recent context for a session, oldest first, at most `window` lines.
    pub async fn assemble(&self, user_id: &str, session_id: &str, window: usize) -> Vec<String> {
        let local = self.short_term.recent(user_id, session_id, window);
        self.supplement(user_id, session_id, local, window).await
    }

    /// Top up an already-gathered context from durable history if it is
    /// shorter than `window`.
    pub async fn supplement(
        &self,
        user_id: &str,
        session_id: &str,
        existing: Vec<String>,
        window: usize,
    ) -> Vec<String> {
        if existing.len() >= window {
            return tail(existing, window);
        }
        let durable = self.durable(user_id, session_id, window).await;
        merge(durable, existing, window)
    }

    async fn durable(&self, user_id: &str, session_id: &str, window: usize) -> Vec<String> {
        match self.store.recent_history(user_id, session_id, window).await {
            Ok(rows) => rows.iter().rev().map(|row| row.context_line()).collect(),
            Err(e) => {
                warn!(user_id, session_id, "failed to load recent history: {e}");
                Vec::new()
            }
        }
    }
}

fn tail(mut lines: Vec<String>, window: usize) -> Vec<String> {
    if lines.len() > window {
        lines.drain(..lines.len() - window);
    }
    lines
}

/// Merge durable (older) and local (newest) lines, dropping the overlap.
///
/// The local window is taken as the newest stretch of the conversation; only
/// durable lines older than it are put in front. The two can diverge when a
/// sentence failed to persist or history was cascaded away, so a plain
/// suffix/prefix overlap is tried first and the oldest local line is used as
/// the anchor otherwise.
fn merge(durable: Vec<String>, local: Vec<String>, window: usize) -> Vec<String> {
    if local.is_empty() {
        return tail(durable, window);
    }
    if durable.windows(local.len()).any(|w| w == local.as_slice()) {
        return tail(durable, window);
    }

    let max_overlap = durable.len().min(local.len());
    let overlap = (1..=max_overlap)
        .rev()
        .find(|&k| durable[durable.len() - k..] == local[..k]);

    let mut merged = match overlap {
        Some(k) => durable[..durable.len() - k].to_vec(),
        None => match durable.iter().rposition(|line| *line == local[0]) {
            Some(anchor) => durable[..anchor].to_vec(),
            None => without_local(durable, &local),
        },
    };
    merged.extend(local);
    tail(merged, window)
}

/// Durable lines with every line the local window also holds taken out,
/// counting repeats.
fn without_local(durable: Vec<String>, local: &[String]) -> Vec<String> {
    let mut held: HashMap<&str, usize> = HashMap::new();
    for line in local {
        *held.entry(line.as_str()).or_default() += 1;
    }
    let mut kept: Vec<String> = durable
        .into_iter()
        .rev()
        .filter(|line| match held.get_mut(line.as_str()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                false
            }
            _ => true,
        })
        .collect();
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_drops_suffix_overlap() {
        let durable = lines(&["a", "b", "c"]);
        let local = lines(&["b", "c", "d"]);
        assert_eq!(merge(durable, local, 10), lines(&["a", "b", "c", "d"]));
    }

    #[test]
    fn merge_keeps_durable_when_local_is_contained() {
        let durable = lines(&["a", "b", "c", "d"]);
        let local = lines(&["b", "c"]);
        assert_eq!(merge(durable, local, 10), lines(&["a", "b", "c", "d"]));
    }

    #[test]
    fn merge_appends_disjoint_local_and_caps() {
        let durable = lines(&["a", "b"]);
        let local = lines(&["x", "y"]);
        assert_eq!(merge(durable, local, 3), lines(&["b", "x", "y"]));
    }

    #[test]
    fn merge_anchors_a_diverged_window_on_its_oldest_line() {
        let durable = lines(&["a", "b", "c", "d"]);
        let local = lines(&["b", "c", "X", "d"]);
        assert_eq!(merge(durable, local, 10), lines(&["a", "b", "c", "X", "d"]));
    }

    #[test]
    fn merge_keeps_repeated_lines_that_overlap() {
        let durable = lines(&["ok", "a", "ok", "b"]);
        let local = lines(&["ok", "a", "ok", "b", "c"]);
        assert_eq!(merge(durable, local, 10), lines(&["ok", "a", "ok", "b", "c"]));
    }

    #[test]
    fn merge_drops_held_lines_when_there_is_no_anchor() {
        // The oldest local line was deleted from storage.
        let durable = lines(&["a", "b", "c"]);
        let local = lines(&["gone", "b", "c", "d"]);
        assert_eq!(merge(durable, local, 10), lines(&["a", "gone", "b", "c", "d"]));
    }

    #[test]
    fn merge_with_empty_durable_is_local() {
        assert_eq!(merge(Vec::new(), lines(&["x"]), 5), lines(&["x"]));
    }
}
