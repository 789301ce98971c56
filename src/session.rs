//! Process-local ingestion side state
//!
//! Change detection and log throttling need a little memory between calls:
//! the last known state per participant and when the meeting last logged. It
//! lives here, keyed by meeting id, rather than on the persisted aggregate.
//! Entries appear on first ingestion and are discarded when the meeting ends.

use crate::types::AttentionState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Side state for one meeting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Most recently seen state per participant
    pub last_states: HashMap<String, AttentionState>,
    pub last_log_at: Option<DateTime<Utc>>,
}

/// Table of side state keyed by meeting id
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the last known states for a meeting (empty if unseen)
    pub fn last_states(&self, meeting_id: &str) -> HashMap<String, AttentionState> {
        self.with_session(meeting_id, |s| s.last_states.clone())
            .unwrap_or_default()
    }

    /// Record the states seen in the latest call; participants absent from
    /// the call keep their previous state
    pub fn merge_states(&self, meeting_id: &str, states: HashMap<String, AttentionState>) {
        self.with_session(meeting_id, |s| s.last_states.extend(states));
    }

    /// Whether a "processing" line should be logged now; records it if so
    pub fn should_log(&self, meeting_id: &str, now: DateTime<Utc>, throttle_secs: u64) -> bool {
        self.with_session(meeting_id, |s| {
            let due = match s.last_log_at {
                Some(last) => (now - last).num_seconds() > throttle_secs as i64,
                None => true,
            };
            if due {
                s.last_log_at = Some(now);
            }
            due
        })
        .unwrap_or(false)
    }

    /// Drop all side state for a meeting
    pub fn discard(&self, meeting_id: &str) -> bool {
        match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(meeting_id).is_some(),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_session<T>(&self, meeting_id: &str, f: impl FnOnce(&mut SessionState) -> T) -> Option<T> {
        let mut sessions = self.sessions.lock().ok()?;
        let session = sessions.entry(meeting_id.to_string()).or_default();
        Some(f(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_states_merge_per_participant() {
        let table = SessionTable::new();
        let mut states = HashMap::new();
        states.insert("a".to_string(), AttentionState::Attentive);
        states.insert("b".to_string(), AttentionState::Drowsy);
        table.merge_states("m1", states);

        let mut next = HashMap::new();
        next.insert("a".to_string(), AttentionState::Absent);
        table.merge_states("m1", next);

        let current = table.last_states("m1");
        assert_eq!(current.len(), 2);
        assert_eq!(current.get("a"), Some(&AttentionState::Absent));
        assert_eq!(current.get("b"), Some(&AttentionState::Drowsy));
        assert!(table.last_states("m2").is_empty());
    }

    #[test]
    fn test_log_throttle() {
        let table = SessionTable::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();

        assert!(table.should_log("m1", t0, 50));
        assert!(!table.should_log("m1", t0 + Duration::seconds(30), 50));
        assert!(!table.should_log("m1", t0 + Duration::seconds(50), 50));
        assert!(table.should_log("m1", t0 + Duration::seconds(51), 50));
        assert!(table.should_log("m2", t0, 50));
    }

    #[test]
    fn test_discard() {
        let table = SessionTable::new();
        table.merge_states("m1", HashMap::new());
        assert_eq!(table.len(), 1);
        assert!(table.discard("m1"));
        assert!(!table.discard("m1"));
        assert!(table.is_empty());
    }
}
