//! Meeting statistics reconciliation
//!
//! Recomputes [`OverallStats`] from a fresh read of the participants. The
//! derived statistics are rewritten wholesale, never patched. When sampled
//! time exceeds wall-clock elapsed time, every bucket is scaled down so the
//! totals match the meeting duration.

use crate::config::LimitsConfig;
use crate::error::StoreError;
use crate::store::MeetingStore;
use crate::types::{AttentionCategory, AttentionState, Meeting, OverallStats, Participant, StateDurations};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Result of a reconciliation computation, before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub stats: OverallStats,
    /// Sanitized and possibly rescaled buckets per participant
    pub durations: Vec<(String, StateDurations)>,
    /// Applied scale factor, when drift correction ran
    pub scale: Option<f64>,
}

pub struct StatsReconciler {
    limits: LimitsConfig,
}

impl Default for StatsReconciler {
    fn default() -> Self {
        Self::new(LimitsConfig::default())
    }
}

impl StatsReconciler {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Reload, recompute and persist. Returns the updated aggregate, or the
    /// prior one unchanged if anything fails.
    pub fn reconcile(&self, store: &dyn MeetingStore, prior: &Meeting, now: DateTime<Utc>) -> Meeting {
        match self.try_reconcile(store, &prior.id, now) {
            Ok(updated) => updated,
            Err(e) => {
                log::error!("Error calculating stats for meeting {}: {}", prior.id, e);
                prior.clone()
            }
        }
    }

    fn try_reconcile(
        &self,
        store: &dyn MeetingStore,
        meeting_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Meeting, StoreError> {
        let mut fresh = store.load_meeting(meeting_id)?;
        log::info!(
            "Calculating stats for meeting {} with {} participants",
            meeting_id,
            fresh.participants.len()
        );

        let result = self.compute(&fresh, now);

        store.write_reconciliation(meeting_id, &result.durations, &result.stats)?;

        for (participant, (_, data)) in fresh.participants.iter_mut().zip(&result.durations) {
            participant.attention_data = *data;
        }
        fresh.overall_stats = result.stats;

        log::info!("Stats calculation complete for meeting {}", meeting_id);
        Ok(fresh)
    }

    /// Pure recomputation over an already-loaded aggregate
    pub fn compute(&self, meeting: &Meeting, now: DateTime<Utc>) -> Reconciliation {
        let total_participants = meeting.participants.len() as u32;
        let max_concurrent_participants = peak_concurrency(&meeting.participants);
        let meeting_duration = meeting_duration(
            meeting.start_time,
            meeting.end_time,
            now,
            self.limits.max_meeting_secs,
        );

        let mut durations: Vec<(String, StateDurations)> = meeting
            .participants
            .iter()
            .map(|p| (p.user_id.clone(), self.sanitize(p)))
            .collect();

        let mut breakdown: BTreeMap<AttentionState, u64> =
            AttentionState::ALL.into_iter().map(|s| (s, 0)).collect();
        for (_, data) in &durations {
            for (state, seconds) in data.iter() {
                *breakdown.entry(state).or_insert(0) += seconds as u64;
            }
        }

        let mut attentive_time = category_total(&breakdown, AttentionCategory::Attentive);
        let mut distracted_time = category_total(&breakdown, AttentionCategory::Distracted);
        let mut absent_time = category_total(&breakdown, AttentionCategory::Absent);
        let mut total_time = attentive_time + distracted_time + absent_time;

        let mut scale = None;
        if meeting_duration > 0 && total_time > meeting_duration {
            let factor = meeting_duration as f64 / total_time as f64;
            log::info!(
                "Scaling attention data by factor {:.4} to match meeting duration",
                factor
            );

            for value in breakdown.values_mut() {
                *value = scale_down(*value, factor);
            }
            attentive_time = scale_down(attentive_time, factor);
            distracted_time = scale_down(distracted_time, factor);
            absent_time = scale_down(absent_time, factor);
            total_time = meeting_duration;

            for (_, data) in durations.iter_mut() {
                for state in AttentionState::ALL {
                    let bucket = data.get_mut(state);
                    *bucket = (*bucket * factor).floor();
                }
            }
            scale = Some(factor);
        }

        let average_attention = if total_time > 0 {
            round2(attentive_time as f64 / total_time as f64 * 100.0)
        } else {
            0.0
        };

        Reconciliation {
            stats: OverallStats {
                total_participants,
                max_concurrent_participants,
                average_attention,
                attentive_time,
                distracted_time,
                absent_time,
                state_breakdown: breakdown,
                meeting_duration,
            },
            durations,
            scale,
        }
    }

    fn sanitize(&self, participant: &Participant) -> StateDurations {
        let mut data = participant.attention_data;
        for state in AttentionState::ALL {
            let raw = data.get(state);
            let clean = sanitize_seconds(raw, self.limits.max_state_secs);
            if clean != raw {
                log::warn!(
                    "Invalid {} value for participant {}: {} -> {}",
                    state,
                    participant.user_id,
                    raw,
                    clean
                );
            }
            *data.get_mut(state) = clean;
        }
        data
    }
}

/// Peak number of simultaneously present participants.
///
/// Sweeps sorted join/leave instants when at least half the joins have a
/// recorded leave; a leave at the same instant as a join is processed first.
/// With sparser leave data the participant count is used as an estimate.
pub fn peak_concurrency(participants: &[Participant]) -> u32 {
    let mut joins: Vec<DateTime<Utc>> = participants.iter().filter_map(|p| p.join_time).collect();
    let mut leaves: Vec<DateTime<Utc>> = participants.iter().filter_map(|p| p.leave_time).collect();

    if leaves.len() * 2 < joins.len() {
        return participants.len() as u32;
    }

    joins.sort();
    leaves.sort();

    let (mut i, mut j) = (0, 0);
    let mut current: i64 = 0;
    let mut peak: i64 = 0;

    while i < joins.len() || j < leaves.len() {
        let leave_next = j < leaves.len() && (i >= joins.len() || leaves[j] <= joins[i]);
        if leave_next {
            current -= 1;
            j += 1;
        } else {
            current += 1;
            peak = peak.max(current);
            i += 1;
        }
    }

    peak as u32
}

/// Elapsed whole seconds from start to end (or now), clamped to `[0, cap]`
pub fn meeting_duration(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cap: u64,
) -> u64 {
    let effective_end = end.unwrap_or(now);
    let elapsed_ms = (effective_end - start).num_milliseconds();
    let seconds = (elapsed_ms / 1000).max(0) as u64;

    if seconds > cap {
        log::warn!("Meeting has excessive duration: {}s. Capping to {}s", seconds, cap);
        cap
    } else {
        seconds
    }
}

/// Zero NaN or negative values, clamp to the ceiling, drop fractions
pub fn sanitize_seconds(value: f64, ceiling: u64) -> f64 {
    if value.is_nan() || value < 0.0 {
        return 0.0;
    }
    value.min(ceiling as f64).floor()
}

fn category_total(breakdown: &BTreeMap<AttentionState, u64>, category: AttentionCategory) -> u64 {
    breakdown
        .iter()
        .filter(|(state, _)| state.category() == category)
        .map(|(_, seconds)| *seconds)
        .sum()
}

fn scale_down(value: u64, factor: f64) -> u64 {
    (value as f64 * factor).floor() as u64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
