//! Raw attention log and its analytics projection
//!
//! Detectors also append one record per reading to an append-only log. This
//! read path aggregates that log independently of [`OverallStats`](crate::types::OverallStats)
//! for ad-hoc reporting: an overview, per-participant summaries and a
//! per-minute time series of state shares.

use crate::config::MAX_MEETING_SECONDS;
use crate::error::EngineError;
use crate::reconciler::meeting_duration;
use crate::types::{AttentionState, Meeting, ANONYMOUS};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Optional detector measurements attached to a reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_presence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eye_openness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looking_score: Option<f64>,
}

/// One raw reading as stored in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionLog {
    pub meeting_id: String,
    pub user_id: String,
    #[serde(default = "anonymous")]
    pub user_name: String,
    pub attention_state: AttentionState,
    /// Detector's attention estimate (0-100)
    #[serde(default)]
    pub attention_percentage: f64,
    /// Detector confidence (0-100)
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub measurements: Measurements,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub room_id: String,
}

fn anonymous() -> String {
    ANONYMOUS.to_string()
}

impl AttentionLog {
    /// Check required identifiers and value ranges
    pub fn validate(&self) -> Result<(), EngineError> {
        let required = [
            ("meetingId", &self.meeting_id),
            ("userId", &self.user_id),
            ("sessionId", &self.session_id),
            ("roomId", &self.room_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EngineError::InvalidLog(format!("missing required field {field}")));
            }
        }

        for (field, value) in [
            ("attentionPercentage", self.attention_percentage),
            ("confidence", self.confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(EngineError::InvalidLog(format!(
                    "{field} out of range: {value}"
                )));
            }
        }

        Ok(())
    }
}

/// Per-state counts keyed by canonical state
pub type StateCounts = BTreeMap<AttentionState, u64>;

fn zero_counts() -> StateCounts {
    AttentionState::ALL.into_iter().map(|s| (s, 0)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub total_logs: u64,
    pub total_participants: u64,
    pub average_attention: f64,
    pub state_breakdown: StateCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAnalytics {
    pub user_id: String,
    pub user_name: String,
    pub total_logs: u64,
    pub attention_states: StateCounts,
    pub average_attention: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Share of readings per state within one minute (percentages)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub states: BTreeMap<AttentionState, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingAnalytics {
    pub overview: AnalyticsOverview,
    pub participant_data: Vec<ParticipantAnalytics>,
    pub time_series_data: Vec<TimeSeriesPoint>,
    /// Meeting duration in seconds
    pub duration: u64,
}

struct ParticipantAccumulator {
    user_name: String,
    total_logs: u64,
    states: StateCounts,
    attention_sum: f64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl MeetingAnalytics {
    /// Aggregate a meeting's logs. Logs need not be sorted.
    pub fn from_logs(meeting: &Meeting, logs: &[AttentionLog], now: DateTime<Utc>) -> Self {
        let duration = meeting_duration(meeting.start_time, meeting.end_time, now, MAX_MEETING_SECONDS);

        let mut sorted: Vec<&AttentionLog> = logs.iter().collect();
        sorted.sort_by_key(|l| l.timestamp);

        let names: HashMap<&str, &str> = meeting
            .participants
            .iter()
            .filter(|p| !p.name.is_empty())
            .map(|p| (p.user_id.as_str(), p.name.as_str()))
            .collect();

        let mut breakdown = zero_counts();
        let mut attention_sum = 0.0;
        let mut order: Vec<&str> = Vec::new();
        let mut participants: HashMap<&str, ParticipantAccumulator> = HashMap::new();
        let mut minutes: BTreeMap<DateTime<Utc>, StateCounts> = BTreeMap::new();

        for log in &sorted {
            let entry = participants.entry(log.user_id.as_str()).or_insert_with(|| {
                order.push(log.user_id.as_str());
                let user_name = names
                    .get(log.user_id.as_str())
                    .map(|n| n.to_string())
                    .or_else(|| Some(log.user_name.clone()).filter(|n| !n.is_empty()))
                    .unwrap_or_else(anonymous);
                ParticipantAccumulator {
                    user_name,
                    total_logs: 0,
                    states: zero_counts(),
                    attention_sum: 0.0,
                    first_seen: log.timestamp,
                    last_seen: log.timestamp,
                }
            });
            entry.total_logs += 1;
            *entry.states.entry(log.attention_state).or_insert(0) += 1;
            entry.attention_sum += log.attention_percentage;
            entry.last_seen = log.timestamp;

            *breakdown.entry(log.attention_state).or_insert(0) += 1;
            attention_sum += log.attention_percentage;

            let minute = minute_bucket(log.timestamp);
            *minutes
                .entry(minute)
                .or_insert_with(zero_counts)
                .entry(log.attention_state)
                .or_insert(0) += 1;
        }

        let total_logs = sorted.len() as u64;
        let average_attention = if total_logs > 0 {
            round2(attention_sum / total_logs as f64)
        } else {
            0.0
        };

        let participant_data: Vec<ParticipantAnalytics> = order
            .iter()
            .filter_map(|user_id| participants.remove(user_id).map(|acc| (user_id, acc)))
            .map(|(user_id, acc)| ParticipantAnalytics {
                user_id: user_id.to_string(),
                user_name: acc.user_name,
                total_logs: acc.total_logs,
                attention_states: acc.states,
                average_attention: if acc.total_logs > 0 {
                    round2(acc.attention_sum / acc.total_logs as f64)
                } else {
                    0.0
                },
                first_seen: acc.first_seen,
                last_seen: acc.last_seen,
            })
            .collect();

        let time_series_data = minutes
            .into_iter()
            .map(|(timestamp, counts)| {
                let total: u64 = counts.values().sum();
                let states = counts
                    .into_iter()
                    .map(|(state, count)| {
                        let share = if total > 0 {
                            round2(count as f64 / total as f64 * 100.0)
                        } else {
                            0.0
                        };
                        (state, share)
                    })
                    .collect();
                TimeSeriesPoint { timestamp, states }
            })
            .collect();

        MeetingAnalytics {
            overview: AnalyticsOverview {
                total_logs,
                total_participants: participant_data.len() as u64,
                average_attention,
                state_breakdown: breakdown,
            },
            participant_data,
            time_series_data,
            duration,
        }
    }
}

fn minute_bucket(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(timestamp)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
