//! Batch mutation of the meeting aggregate
//!
//! One ingestion call becomes three coalesced operations issued in a fixed
//! order: register unseen participants, credit each participant's current
//! state bucket, then append transition snapshots in small sub-batches. Each
//! operation is idempotent or additive on its own; there is no cross-batch
//! transaction, so a failure leaves earlier operations applied.

use crate::buffer::SnapshotBuffer;
use crate::config::{BufferConfig, LimitsConfig};
use crate::error::StoreError;
use crate::store::MeetingStore;
use crate::types::{AttentionState, Meeting, Participant, Snapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A participant signal that survived normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSignal {
    pub user_id: String,
    pub state: AttentionState,
    pub display_name: Option<String>,
}

/// One additive bucket update
#[derive(Debug, Clone, PartialEq)]
pub struct DurationIncrement {
    pub user_id: String,
    pub state: AttentionState,
    pub seconds: u64,
}

/// Coalesced mutations for one ingestion call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationPlan {
    pub registrations: Vec<Participant>,
    pub increments: Vec<DurationIncrement>,
    pub snapshot_batches: Vec<Vec<Snapshot>>,
}

impl MutationPlan {
    pub fn snapshot_count(&self) -> usize {
        self.snapshot_batches.iter().map(Vec::len).sum()
    }
}

/// What was applied before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationReport {
    pub registered: usize,
    pub incremented: usize,
    pub snapshots: usize,
    pub snapshot_batches: usize,
}

pub struct BatchMutator {
    buffer: SnapshotBuffer,
    batch_size: usize,
    state_ceiling: u64,
}

impl Default for BatchMutator {
    fn default() -> Self {
        Self::new(&BufferConfig::default(), &LimitsConfig::default())
    }
}

impl BatchMutator {
    pub fn new(buffer: &BufferConfig, limits: &LimitsConfig) -> Self {
        Self {
            buffer: SnapshotBuffer::new(buffer.snapshot_cap),
            batch_size: buffer.snapshot_batch.max(1),
            state_ceiling: limits.max_state_secs,
        }
    }

    /// Build the plan for a validated batch; `None` when there is nothing to do
    pub fn plan(
        &self,
        meeting: &Meeting,
        signals: &[ValidSignal],
        last_states: &HashMap<String, AttentionState>,
        increment_secs: u64,
        timestamp: DateTime<Utc>,
    ) -> Option<MutationPlan> {
        if signals.is_empty() {
            return None;
        }

        let registrations = signals
            .iter()
            .filter(|s| !meeting.has_participant(&s.user_id))
            .map(|s| Participant::new(s.user_id.clone(), s.display_name.clone(), timestamp))
            .collect();

        let increments = signals
            .iter()
            .map(|s| DurationIncrement {
                user_id: s.user_id.clone(),
                state: s.state,
                seconds: increment_secs,
            })
            .collect();

        let current: Vec<(String, AttentionState)> = signals
            .iter()
            .map(|s| (s.user_id.clone(), s.state))
            .collect();
        let snapshot_batches = self
            .buffer
            .transitions(last_states, &current, timestamp)
            .chunks(self.batch_size)
            .map(<[Snapshot]>::to_vec)
            .collect();

        Some(MutationPlan {
            registrations,
            increments,
            snapshot_batches,
        })
    }

    /// Apply a plan in order. Stops at the first failure without undoing prior steps.
    pub fn apply(
        &self,
        store: &dyn MeetingStore,
        meeting_id: &str,
        plan: &MutationPlan,
    ) -> Result<MutationReport, StoreError> {
        let mut report = MutationReport::default();

        if !plan.registrations.is_empty() {
            report.registered = store.register_participants(meeting_id, &plan.registrations)?;
        }

        for inc in &plan.increments {
            store.increment_duration(
                meeting_id,
                &inc.user_id,
                inc.state,
                inc.seconds,
                self.state_ceiling,
            )?;
            report.incremented += 1;
        }

        for batch in &plan.snapshot_batches {
            store.push_snapshots(meeting_id, batch, self.buffer.cap())?;
            report.snapshots += batch.len();
            report.snapshot_batches += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{OverallStats, StateDurations};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 15, 0, 0).unwrap()
    }

    fn signals(n: usize, state: AttentionState) -> Vec<ValidSignal> {
        (0..n)
            .map(|i| ValidSignal {
                user_id: format!("user-{i:02}"),
                state,
                display_name: None,
            })
            .collect()
    }

    #[test]
    fn test_empty_batch_plans_nothing() {
        let mutator = BatchMutator::default();
        let meeting = Meeting::new("r", t0());
        assert!(mutator
            .plan(&meeting, &[], &HashMap::new(), 5, t0())
            .is_none());
    }

    #[test]
    fn test_plan_shapes() {
        let mutator = BatchMutator::default();
        let mut meeting = Meeting::new("r", t0());
        meeting
            .participants
            .push(Participant::new("user-00", None, t0()));

        let batch = signals(23, AttentionState::Active);
        let plan = mutator
            .plan(&meeting, &batch, &HashMap::new(), 3, t0())
            .unwrap();

        assert_eq!(plan.registrations.len(), 22);
        assert_eq!(plan.increments.len(), 23);
        assert!(plan.increments.iter().all(|i| i.seconds == 3));

        let sizes: Vec<usize> = plan.snapshot_batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert_eq!(plan.snapshot_count(), 23);
    }

    #[test]
    fn test_unchanged_states_skip_snapshots() {
        let mutator = BatchMutator::default();
        let meeting = Meeting::new("r", t0());
        let batch = signals(3, AttentionState::Drowsy);
        let last: HashMap<String, AttentionState> = batch
            .iter()
            .map(|s| (s.user_id.clone(), s.state))
            .collect();

        let plan = mutator.plan(&meeting, &batch, &last, 5, t0()).unwrap();
        assert_eq!(plan.snapshot_count(), 0);
        assert_eq!(plan.increments.len(), 3);
    }

    #[test]
    fn test_display_name_used_at_registration() {
        let mutator = BatchMutator::default();
        let meeting = Meeting::new("r", t0());
        let batch = vec![ValidSignal {
            user_id: "u".to_string(),
            state: AttentionState::Attentive,
            display_name: Some("Ada".to_string()),
        }];

        let plan = mutator
            .plan(&meeting, &batch, &HashMap::new(), 5, t0())
            .unwrap();
        assert_eq!(plan.registrations[0].name, "Ada");
        assert_eq!(plan.registrations[0].join_time, Some(t0()));
        assert_eq!(plan.registrations[0].attention_data, StateDurations::default());
    }

    /// Store wrapper that fails snapshot appends after a number of successes
    struct FlakySnapshots {
        inner: InMemoryStore,
        allowed: AtomicUsize,
    }

    impl MeetingStore for FlakySnapshots {
        fn create_meeting(&self, meeting: Meeting) -> Result<(), StoreError> {
            self.inner.create_meeting(meeting)
        }
        fn load_meeting(&self, id: &str) -> Result<Meeting, StoreError> {
            self.inner.load_meeting(id)
        }
        fn find_by_room(&self, room_id: &str) -> Result<Option<Meeting>, StoreError> {
            self.inner.find_by_room(room_id)
        }
        fn register_participants(&self, id: &str, p: &[Participant]) -> Result<usize, StoreError> {
            self.inner.register_participants(id, p)
        }
        fn increment_duration(
            &self,
            id: &str,
            user_id: &str,
            state: AttentionState,
            seconds: u64,
            ceiling: u64,
        ) -> Result<(), StoreError> {
            self.inner.increment_duration(id, user_id, state, seconds, ceiling)
        }
        fn push_snapshots(&self, id: &str, s: &[Snapshot], cap: usize) -> Result<(), StoreError> {
            let remaining = self.allowed.load(Ordering::SeqCst);
            if remaining == 0 {
                return Err(StoreError::Backend("write timeout".to_string()));
            }
            self.allowed.store(remaining - 1, Ordering::SeqCst);
            self.inner.push_snapshots(id, s, cap)
        }
        fn trim_snapshots(&self, id: &str, cap: usize) -> Result<usize, StoreError> {
            self.inner.trim_snapshots(id, cap)
        }
        fn write_reconciliation(
            &self,
            id: &str,
            d: &[(String, StateDurations)],
            stats: &OverallStats,
        ) -> Result<(), StoreError> {
            self.inner.write_reconciliation(id, d, stats)
        }
        fn record_leave(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.record_leave(id, user_id, at)
        }
        fn end_meeting(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.end_meeting(id, at)
        }
    }

    #[test]
    fn test_failed_sub_batch_keeps_prior_work() {
        let store = FlakySnapshots {
            inner: InMemoryStore::new(),
            allowed: AtomicUsize::new(1),
        };
        let meeting = Meeting::new("r", t0());
        let id = meeting.id.clone();
        store.create_meeting(meeting.clone()).unwrap();

        let mutator = BatchMutator::default();
        let plan = mutator
            .plan(&meeting, &signals(15, AttentionState::Absent), &HashMap::new(), 5, t0())
            .unwrap();

        let err = mutator.apply(&store, &id, &plan).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        let stored = store.load_meeting(&id).unwrap();
        assert_eq!(stored.participants.len(), 15);
        assert!(stored
            .participants
            .iter()
            .all(|p| p.attention_data.absent == 5.0));
        // First sub-batch landed, second did not
        assert_eq!(stored.attention_snapshots.len(), 10);
    }

    #[test]
    fn test_apply_report() {
        let store = InMemoryStore::new();
        let meeting = Meeting::new("r", t0());
        let id = meeting.id.clone();
        store.create_meeting(meeting.clone()).unwrap();

        let mutator = BatchMutator::default();
        let plan = mutator
            .plan(&meeting, &signals(12, AttentionState::Attentive), &HashMap::new(), 5, t0())
            .unwrap();
        let report = mutator.apply(&store, &id, &plan).unwrap();

        assert_eq!(
            report,
            MutationReport {
                registered: 12,
                incremented: 12,
                snapshots: 12,
                snapshot_batches: 2,
            }
        );
    }
}
