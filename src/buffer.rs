//! Bounded snapshot buffer
//!
//! The meeting-wide transition log keeps only the most recent entries. A new
//! snapshot is recorded only when a participant's state differs from the one
//! seen in the previous ingestion call.

use crate::config::DEFAULT_SNAPSHOT_CAP;
use crate::types::{AttentionState, Snapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Cap and change detection for the transition log
#[derive(Debug, Clone, Copy)]
pub struct SnapshotBuffer {
    cap: usize,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAP)
    }
}

impl SnapshotBuffer {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1) }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn needs_trim(&self, len: usize) -> bool {
        len > self.cap
    }

    /// Drop the oldest entries so at most `cap` remain; returns how many went
    pub fn retain_recent<T>(&self, entries: &mut Vec<T>) -> usize {
        let excess = entries.len().saturating_sub(self.cap);
        if excess > 0 {
            entries.drain(..excess);
        }
        excess
    }

    /// Append then keep the most recent `cap` entries
    pub fn append<T: Clone>(&self, entries: &mut Vec<T>, new: &[T]) -> usize {
        entries.extend_from_slice(new);
        self.retain_recent(entries)
    }

    /// Snapshots for participants whose state changed since the last call.
    ///
    /// `current` keeps the caller's order so snapshots are appended in the
    /// order the batch was processed.
    pub fn transitions(
        &self,
        last_states: &HashMap<String, AttentionState>,
        current: &[(String, AttentionState)],
        timestamp: DateTime<Utc>,
    ) -> Vec<Snapshot> {
        current
            .iter()
            .filter(|(user_id, state)| last_states.get(user_id) != Some(state))
            .map(|(user_id, state)| Snapshot {
                user_id: user_id.clone(),
                attention_state: *state,
                timestamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snap(i: usize) -> Snapshot {
        Snapshot {
            user_id: format!("u{i}"),
            attention_state: AttentionState::Attentive,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_retain_recent_drops_oldest() {
        let buffer = SnapshotBuffer::new(3);
        let mut entries: Vec<Snapshot> = (0..5).map(snap).collect();

        assert!(buffer.needs_trim(entries.len()));
        assert_eq!(buffer.retain_recent(&mut entries), 2);
        let ids: Vec<_> = entries.iter().map(|s| s.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u2", "u3", "u4"]);

        assert_eq!(buffer.retain_recent(&mut entries), 0);
        assert!(!buffer.needs_trim(entries.len()));
    }

    #[test]
    fn test_append_never_exceeds_cap() {
        let buffer = SnapshotBuffer::default();
        let mut entries = Vec::new();

        for round in 0..50 {
            let batch: Vec<Snapshot> = (0..7).map(|i| snap(round * 7 + i)).collect();
            buffer.append(&mut entries, &batch);
            assert!(entries.len() <= 200);
        }

        assert_eq!(entries.len(), 200);
        assert_eq!(entries.last().map(|s| s.user_id.as_str()), Some("u349"));
    }

    #[test]
    fn test_transitions_only_on_change() {
        let buffer = SnapshotBuffer::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let mut last = HashMap::new();
        last.insert("a".to_string(), AttentionState::Attentive);
        last.insert("b".to_string(), AttentionState::Attentive);

        let current = vec![
            ("a".to_string(), AttentionState::Attentive),
            ("b".to_string(), AttentionState::Drowsy),
            ("c".to_string(), AttentionState::Absent),
        ];

        let snapshots = buffer.transitions(&last, &current, at);
        let changed: Vec<_> = snapshots
            .iter()
            .map(|s| (s.user_id.as_str(), s.attention_state))
            .collect();
        assert_eq!(
            changed,
            vec![("b", AttentionState::Drowsy), ("c", AttentionState::Absent)]
        );
        assert!(snapshots.iter().all(|s| s.timestamp == at));
    }
}
