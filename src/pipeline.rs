//! Pipeline orchestration
//!
//! This module provides the public API of the engine. An ingestion call runs:
//! 1. BackpressureGuard - drop the whole call under memory pressure
//! 2. StateNormalizer - map raw payloads to canonical states
//! 3. TimeAccumulator - one shared increment for the call
//! 4. BatchMutator - register, increment, append snapshots
//!
//! Reconciliation runs independently and always starts from a fresh read.

use crate::accumulator::TimeAccumulator;
use crate::backpressure::{BackpressureGuard, HealthReport, HeapProbe, ProcessMemoryProbe};
use crate::buffer::SnapshotBuffer;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::mutator::{BatchMutator, MutationReport, ValidSignal};
use crate::normalizer::StateNormalizer;
use crate::reconciler::StatsReconciler;
use crate::session::SessionTable;
use crate::store::MeetingStore;
use crate::types::{AttentionState, Meeting};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One ingestion call as received from the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBatch {
    #[serde(default)]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// userId -> raw signal (string or object)
    pub signals: Map<String, Value>,
}

/// Ingestion and reconciliation engine shared by all signal sources
pub struct AttentionEngine {
    config: EngineConfig,
    store: Arc<dyn MeetingStore>,
    guard: BackpressureGuard,
    accumulator: TimeAccumulator,
    buffer: SnapshotBuffer,
    mutator: BatchMutator,
    reconciler: StatsReconciler,
    sessions: SessionTable,
    started_at: Instant,
}

impl AttentionEngine {
    /// Create an engine sampling this process's memory
    pub fn new(config: EngineConfig, store: Arc<dyn MeetingStore>) -> Self {
        Self::with_probe(config, store, Arc::new(ProcessMemoryProbe::new()))
    }

    /// Create an engine with a custom heap probe
    pub fn with_probe(
        config: EngineConfig,
        store: Arc<dyn MeetingStore>,
        probe: Arc<dyn HeapProbe>,
    ) -> Self {
        Self {
            guard: BackpressureGuard::new(config.backpressure.clone(), probe),
            accumulator: TimeAccumulator::new(config.accumulator.clone()),
            buffer: SnapshotBuffer::new(config.buffer.snapshot_cap),
            mutator: BatchMutator::new(&config.buffer, &config.limits),
            reconciler: StatsReconciler::new(config.limits.clone()),
            sessions: SessionTable::new(),
            started_at: Instant::now(),
            config,
            store,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MeetingStore> {
        &self.store
    }

    /// Start a meeting for a room
    pub fn start_meeting(
        &self,
        room_id: &str,
        title: Option<&str>,
        creator_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Meeting, EngineError> {
        let mut meeting = Meeting::new(room_id, at);
        if let Some(title) = title {
            meeting = meeting.with_title(title);
        }
        if let Some(creator) = creator_name {
            meeting = meeting.with_creator(creator);
        }

        self.store.create_meeting(meeting.clone())?;
        log::info!("Meeting {} started in room {}", meeting.id, room_id);
        Ok(meeting)
    }

    /// Mark a meeting ended and discard its ingestion side state
    pub fn end_meeting(&self, meeting_id: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
        self.store.end_meeting(meeting_id, at)?;
        self.sessions.discard(meeting_id);
        log::info!("Meeting {} ended", meeting_id);
        Ok(())
    }

    pub fn record_leave(
        &self,
        meeting_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.store.record_leave(meeting_id, user_id, at)?;
        Ok(())
    }

    /// Ingest one batch of raw per-participant signals.
    ///
    /// Returns `false` when the call was dropped by backpressure or failed
    /// internally. Callers should drop the sample and carry on.
    pub fn ingest(&self, meeting_id: &str, signals: &Map<String, Value>, at: DateTime<Utc>) -> bool {
        if !self.guard.check().is_admitted() {
            return false;
        }

        match self.try_ingest(meeting_id, signals, at) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Error ingesting attention snapshot for meeting {}: {}", meeting_id, e);
                false
            }
        }
    }

    /// Ingest a [`SignalBatch`], defaulting its timestamp to now
    pub fn ingest_batch(&self, meeting_id: &str, batch: &SignalBatch) -> bool {
        let at = batch.timestamp.unwrap_or_else(Utc::now);
        self.ingest(meeting_id, &batch.signals, at)
    }

    fn try_ingest(
        &self,
        meeting_id: &str,
        signals: &Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<Option<MutationReport>, EngineError> {
        let timestamp = at.trunc_subsecs(0);

        let mut meeting = self.store.load_meeting(meeting_id)?;

        if self
            .sessions
            .should_log(meeting_id, timestamp, self.config.log_throttle_secs)
        {
            log::info!(
                "Processing attention snapshot for meeting {} at {}",
                meeting_id,
                timestamp.to_rfc3339()
            );
        }

        if self.buffer.needs_trim(meeting.attention_snapshots.len()) {
            log::info!(
                "Trimming attention snapshots. Current count: {}",
                meeting.attention_snapshots.len()
            );
            self.store.trim_snapshots(meeting_id, self.buffer.cap())?;
            self.buffer.retain_recent(&mut meeting.attention_snapshots);
        }

        let increment = self
            .accumulator
            .increment(meeting.last_snapshot_time(), timestamp);

        let valid = normalize_batch(signals);
        let last_states = self.sessions.last_states(meeting_id);

        let Some(plan) = self.mutator.plan(
            &meeting,
            &valid,
            &last_states,
            increment.seconds,
            timestamp,
        ) else {
            return Ok(None);
        };

        let report = self.mutator.apply(self.store.as_ref(), meeting_id, &plan)?;
        log::debug!(
            "Meeting {}: +{}s for {} participants, {} new, {} snapshots",
            meeting_id,
            increment.seconds,
            report.incremented,
            report.registered,
            report.snapshots
        );

        let states: HashMap<String, AttentionState> =
            valid.into_iter().map(|s| (s.user_id, s.state)).collect();
        self.sessions.merge_states(meeting_id, states);

        Ok(Some(report))
    }

    /// Recompute statistics for a loaded aggregate. On failure the prior
    /// aggregate is returned unchanged.
    pub fn reconcile(&self, prior: &Meeting) -> Meeting {
        self.reconcile_at(prior, Utc::now())
    }

    pub fn reconcile_at(&self, prior: &Meeting, now: DateTime<Utc>) -> Meeting {
        self.reconciler.reconcile(self.store.as_ref(), prior, now)
    }

    /// Load and reconcile by id; `None` if the meeting cannot be read
    pub fn reconcile_meeting(&self, meeting_id: &str, now: DateTime<Utc>) -> Option<Meeting> {
        match self.store.load_meeting(meeting_id) {
            Ok(prior) => Some(self.reconcile_at(&prior, now)),
            Err(e) => {
                log::error!("Meeting {} not available for stats calculation: {}", meeting_id, e);
                None
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::new(
            &self.guard,
            self.started_at.elapsed().as_secs(),
            self.sessions.len(),
        )
    }
}

/// Normalize every entry, silently skipping unusable ones
fn normalize_batch(signals: &Map<String, Value>) -> Vec<ValidSignal> {
    signals
        .iter()
        .filter(|(user_id, _)| is_usable_user_id(user_id))
        .filter_map(|(user_id, raw)| {
            StateNormalizer::normalize(raw).map(|state| ValidSignal {
                user_id: user_id.clone(),
                state,
                display_name: StateNormalizer::display_name(raw),
            })
        })
        .collect()
}

fn is_usable_user_id(user_id: &str) -> bool {
    let trimmed = user_id.trim();
    !trimmed.is_empty() && trimmed != "undefined" && trimmed != "null"
}
