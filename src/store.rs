//! Storage collaborators
//!
//! The engine holds no cross-call lock. It relies on the store offering atomic
//! per-field primitives: additive increments, append-with-cap, full reads and
//! subtree overwrites. [`InMemoryStore`] provides them behind a mutex for
//! single-process deployments and tests.

use crate::analytics::AttentionLog;
use crate::buffer::SnapshotBuffer;
use crate::error::StoreError;
use crate::types::{AttentionState, Meeting, OverallStats, Participant, Snapshot, StateDurations};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Persistent meeting aggregate storage
pub trait MeetingStore: Send + Sync {
    /// Insert a new meeting; room ids are unique
    fn create_meeting(&self, meeting: Meeting) -> Result<(), StoreError>;

    /// Full-document read by id
    fn load_meeting(&self, meeting_id: &str) -> Result<Meeting, StoreError>;

    /// Meeting currently bound to a room, if any
    fn find_by_room(&self, room_id: &str) -> Result<Option<Meeting>, StoreError>;

    /// Add participants not yet present; returns how many were added
    fn register_participants(
        &self,
        meeting_id: &str,
        participants: &[Participant],
    ) -> Result<usize, StoreError>;

    /// Atomically add `seconds` to one participant's state bucket, saturating at `ceiling`
    fn increment_duration(
        &self,
        meeting_id: &str,
        user_id: &str,
        state: AttentionState,
        seconds: u64,
        ceiling: u64,
    ) -> Result<(), StoreError>;

    /// Append to the meeting buffer and each participant's history, keeping the last `cap`
    fn push_snapshots(
        &self,
        meeting_id: &str,
        snapshots: &[Snapshot],
        cap: usize,
    ) -> Result<(), StoreError>;

    /// Truncate the meeting buffer to the last `cap`; returns how many were dropped
    fn trim_snapshots(&self, meeting_id: &str, cap: usize) -> Result<usize, StoreError>;

    /// Overwrite participants' duration buckets and the derived statistics
    /// in one atomic write. Either both land or neither does.
    fn write_reconciliation(
        &self,
        meeting_id: &str,
        durations: &[(String, StateDurations)],
        stats: &OverallStats,
    ) -> Result<(), StoreError>;

    fn record_leave(
        &self,
        meeting_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn end_meeting(&self, meeting_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Append-only raw attention log
pub trait AttentionLogStore: Send + Sync {
    fn append_log(&self, log: AttentionLog) -> Result<(), StoreError>;

    /// Logs for one meeting, oldest first
    fn logs_for_meeting(&self, meeting_id: &str) -> Result<Vec<AttentionLog>, StoreError>;
}

/// Mutex-backed store; each method is one atomic operation
#[derive(Debug, Default)]
pub struct InMemoryStore {
    meetings: Mutex<HashMap<String, Meeting>>,
    logs: Mutex<Vec<AttentionLog>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn meetings(&self) -> Result<MutexGuard<'_, HashMap<String, Meeting>>, StoreError> {
        self.meetings.lock().map_err(|_| StoreError::Poisoned)
    }

    fn with_meeting<T>(
        &self,
        meeting_id: &str,
        f: impl FnOnce(&mut Meeting) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut meetings = self.meetings()?;
        let meeting = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| StoreError::MeetingNotFound(meeting_id.to_string()))?;
        f(meeting)
    }
}

fn participant_mut<'a>(
    meeting: &'a mut Meeting,
    user_id: &str,
) -> Result<&'a mut Participant, StoreError> {
    let meeting_id = meeting.id.clone();
    meeting
        .participants
        .iter_mut()
        .find(|p| p.user_id == user_id)
        .ok_or_else(|| StoreError::ParticipantNotFound {
            meeting_id,
            user_id: user_id.to_string(),
        })
}

impl MeetingStore for InMemoryStore {
    fn create_meeting(&self, meeting: Meeting) -> Result<(), StoreError> {
        let mut meetings = self.meetings()?;
        if meetings.values().any(|m| m.room_id == meeting.room_id) {
            return Err(StoreError::DuplicateRoom(meeting.room_id));
        }
        meetings.insert(meeting.id.clone(), meeting);
        Ok(())
    }

    fn load_meeting(&self, meeting_id: &str) -> Result<Meeting, StoreError> {
        self.with_meeting(meeting_id, |m| Ok(m.clone()))
    }

    fn find_by_room(&self, room_id: &str) -> Result<Option<Meeting>, StoreError> {
        let meetings = self.meetings()?;
        Ok(meetings.values().find(|m| m.room_id == room_id).cloned())
    }

    fn register_participants(
        &self,
        meeting_id: &str,
        participants: &[Participant],
    ) -> Result<usize, StoreError> {
        self.with_meeting(meeting_id, |meeting| {
            let mut added = 0;
            for participant in participants {
                if !meeting.has_participant(&participant.user_id) {
                    meeting.participants.push(participant.clone());
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    fn increment_duration(
        &self,
        meeting_id: &str,
        user_id: &str,
        state: AttentionState,
        seconds: u64,
        ceiling: u64,
    ) -> Result<(), StoreError> {
        self.with_meeting(meeting_id, |meeting| {
            let participant = participant_mut(meeting, user_id)?;
            let bucket = participant.attention_data.get_mut(state);
            let current = if bucket.is_finite() && *bucket > 0.0 {
                *bucket
            } else {
                0.0
            };
            *bucket = (current + seconds as f64).min(ceiling as f64);
            Ok(())
        })
    }

    fn push_snapshots(
        &self,
        meeting_id: &str,
        snapshots: &[Snapshot],
        cap: usize,
    ) -> Result<(), StoreError> {
        let buffer = SnapshotBuffer::new(cap);
        self.with_meeting(meeting_id, |meeting| {
            buffer.append(&mut meeting.attention_snapshots, snapshots);

            for snapshot in snapshots {
                if let Some(participant) = meeting
                    .participants
                    .iter_mut()
                    .find(|p| p.user_id == snapshot.user_id)
                {
                    buffer.append(&mut participant.snapshots, std::slice::from_ref(snapshot));
                }
            }
            Ok(())
        })
    }

    fn trim_snapshots(&self, meeting_id: &str, cap: usize) -> Result<usize, StoreError> {
        let buffer = SnapshotBuffer::new(cap);
        self.with_meeting(meeting_id, |meeting| {
            Ok(buffer.retain_recent(&mut meeting.attention_snapshots))
        })
    }

    fn write_reconciliation(
        &self,
        meeting_id: &str,
        durations: &[(String, StateDurations)],
        stats: &OverallStats,
    ) -> Result<(), StoreError> {
        self.with_meeting(meeting_id, |meeting| {
            for (user_id, data) in durations {
                // Participants are never removed, but skip rather than fail
                if let Some(p) = meeting.participants.iter_mut().find(|p| &p.user_id == user_id) {
                    p.attention_data = *data;
                }
            }
            meeting.overall_stats = stats.clone();
            Ok(())
        })
    }

    fn record_leave(
        &self,
        meeting_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_meeting(meeting_id, |meeting| {
            participant_mut(meeting, user_id)?.leave_time = Some(at);
            Ok(())
        })
    }

    fn end_meeting(&self, meeting_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_meeting(meeting_id, |meeting| {
            meeting.is_active = false;
            meeting.end_time = Some(at);
            Ok(())
        })
    }
}

impl AttentionLogStore for InMemoryStore {
    fn append_log(&self, log: AttentionLog) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().map_err(|_| StoreError::Poisoned)?;
        logs.push(log);
        Ok(())
    }

    fn logs_for_meeting(&self, meeting_id: &str) -> Result<Vec<AttentionLog>, StoreError> {
        let logs = self.logs.lock().map_err(|_| StoreError::Poisoned)?;
        let mut matching: Vec<AttentionLog> = logs
            .iter()
            .filter(|l| l.meeting_id == meeting_id)
            .cloned()
            .collect();
        matching.sort_by_key(|l| l.timestamp);
        Ok(matching)
    }
}
