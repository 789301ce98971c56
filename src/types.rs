//! Core types for the attention engine
//!
//! This module defines the data that flows through ingestion and reconciliation:
//! canonical attention states, per-participant duration buckets, state-change
//! snapshots, the meeting aggregate and its derived statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Display name given to participants registered without one
pub const ANONYMOUS: &str = "Anonymous";

/// Canonical attention state (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionState {
    Attentive,
    Active,
    LookingAway,
    Drowsy,
    Absent,
    Darkness,
}

impl AttentionState {
    /// Every canonical state, in bucket order
    pub const ALL: [AttentionState; 6] = [
        AttentionState::Attentive,
        AttentionState::Active,
        AttentionState::LookingAway,
        AttentionState::Drowsy,
        AttentionState::Absent,
        AttentionState::Darkness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionState::Attentive => "attentive",
            AttentionState::Active => "active",
            AttentionState::LookingAway => "looking_away",
            AttentionState::Drowsy => "drowsy",
            AttentionState::Absent => "absent",
            AttentionState::Darkness => "darkness",
        }
    }

    /// Super-bucket this state rolls up into
    pub fn category(&self) -> AttentionCategory {
        match self {
            AttentionState::Attentive | AttentionState::Active => AttentionCategory::Attentive,
            AttentionState::LookingAway | AttentionState::Drowsy => AttentionCategory::Distracted,
            AttentionState::Absent | AttentionState::Darkness => AttentionCategory::Absent,
        }
    }
}

impl fmt::Display for AttentionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a recognized state alias
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized attention state: {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for AttentionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::normalizer::normalize_state_str(s).ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Aggregate super-buckets used by the meeting statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionCategory {
    Attentive,
    Distracted,
    Absent,
}

/// Accumulated seconds per canonical state.
///
/// Values are stored as raw numbers because the persisted document may have
/// been written by other writers; anything non-numeric deserializes as NaN and
/// is zeroed by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDurations {
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub attentive: f64,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub active: f64,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub looking_away: f64,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub drowsy: f64,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub absent: f64,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub darkness: f64,
}

impl StateDurations {
    pub fn get(&self, state: AttentionState) -> f64 {
        match state {
            AttentionState::Attentive => self.attentive,
            AttentionState::Active => self.active,
            AttentionState::LookingAway => self.looking_away,
            AttentionState::Drowsy => self.drowsy,
            AttentionState::Absent => self.absent,
            AttentionState::Darkness => self.darkness,
        }
    }

    pub fn get_mut(&mut self, state: AttentionState) -> &mut f64 {
        match state {
            AttentionState::Attentive => &mut self.attentive,
            AttentionState::Active => &mut self.active,
            AttentionState::LookingAway => &mut self.looking_away,
            AttentionState::Drowsy => &mut self.drowsy,
            AttentionState::Absent => &mut self.absent,
            AttentionState::Darkness => &mut self.darkness,
        }
    }

    /// Iterate `(state, seconds)` pairs in bucket order
    pub fn iter(&self) -> impl Iterator<Item = (AttentionState, f64)> + '_ {
        AttentionState::ALL.into_iter().map(move |s| (s, self.get(s)))
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, v)| v).sum()
    }
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(f64::NAN))
}

/// Participant role within a meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    #[default]
    Student,
    Teacher,
    /// For roles assigned by the transport layer
    #[serde(untagged)]
    Other(String),
}

/// A recorded state transition for one participant at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub user_id: String,
    pub attention_state: AttentionState,
    pub timestamp: DateTime<Utc>,
}

/// A monitored participant in a meeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub role: ParticipantRole,
    pub join_time: Option<DateTime<Utc>>,
    pub leave_time: Option<DateTime<Utc>>,
    /// Accumulated seconds per state
    #[serde(default)]
    pub attention_data: StateDurations,
    /// This participant's own state-change history
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

impl Participant {
    /// Fresh participant with zeroed buckets and empty history
    pub fn new(user_id: impl Into<String>, name: Option<String>, join_time: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.unwrap_or_else(|| ANONYMOUS.to_string()),
            role: ParticipantRole::default(),
            join_time: Some(join_time),
            leave_time: None,
            attention_data: StateDurations::default(),
            snapshots: Vec::new(),
        }
    }
}

/// Derived meeting statistics. Always recomputable from participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub total_participants: u32,
    pub max_concurrent_participants: u32,
    /// Share of attentive time (0-100)
    pub average_attention: f64,
    /// attentive + active seconds
    pub attentive_time: u64,
    /// looking_away + drowsy seconds
    pub distracted_time: u64,
    /// absent + darkness seconds
    pub absent_time: u64,
    pub state_breakdown: BTreeMap<AttentionState, u64>,
    /// Elapsed meeting seconds (0-7200)
    pub meeting_duration: u64,
}

impl Default for OverallStats {
    fn default() -> Self {
        Self {
            total_participants: 0,
            max_concurrent_participants: 0,
            average_attention: 0.0,
            attentive_time: 0,
            distracted_time: 0,
            absent_time: 0,
            state_breakdown: AttentionState::ALL.into_iter().map(|s| (s, 0)).collect(),
            meeting_duration: 0,
        }
    }
}

/// Meeting aggregate root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub room_id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub creator_name: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Meeting-wide transition buffer, oldest first
    #[serde(default)]
    pub attention_snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub overall_stats: OverallStats,
}

fn default_title() -> String {
    "Untitled Class".to_string()
}

fn default_active() -> bool {
    true
}

impl Meeting {
    /// Create an active meeting with a fresh id
    pub fn new(room_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            title: default_title(),
            creator_name: None,
            start_time,
            end_time: None,
            is_active: true,
            participants: Vec::new(),
            attention_snapshots: Vec::new(),
            overall_stats: OverallStats::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_creator(mut self, creator_name: impl Into<String>) -> Self {
        self.creator_name = Some(creator_name.into());
        self
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    /// Timestamp of the most recent meeting-wide snapshot
    pub fn last_snapshot_time(&self) -> Option<DateTime<Utc>> {
        self.attention_snapshots.last().map(|s| s.timestamp)
    }
}
