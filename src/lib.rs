//! Attention Flux - ingestion and aggregation engine for live attention signals
//!
//! Many detectors report per-participant attention states for a meeting at
//! irregular intervals. Flux turns those signals into a bounded, consistent
//! aggregate through a fixed pipeline: backpressure gate → state normalization
//! → time accumulation → coalesced batch mutation. A separate reconciliation
//! pass recomputes meeting statistics from fresh reads.
//!
//! ## Modules
//!
//! - **Ingestion**: [`AttentionEngine::ingest`] drops under memory pressure,
//!   normalizes raw payloads and credits dwell time to each participant
//! - **Reconciliation**: [`AttentionEngine::reconcile`] rebuilds overall
//!   statistics and corrects drift against wall-clock time
//! - **Analytics**: [`MeetingAnalytics`] projects the raw attention log

pub mod accumulator;
pub mod analytics;
pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod error;
pub mod mutator;
pub mod normalizer;
pub mod pipeline;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod types;

pub use analytics::{AttentionLog, MeetingAnalytics};
pub use backpressure::{BackpressureGuard, HealthReport, HeapProbe, ProcessMemoryProbe};
pub use config::EngineConfig;
pub use error::{EngineError, StoreError};
pub use pipeline::{AttentionEngine, SignalBatch};
pub use store::{AttentionLogStore, InMemoryStore, MeetingStore};
pub use types::{AttentionState, Meeting, OverallStats, Participant, Snapshot};

/// Engine version reported by the CLI and health tooling
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported alongside the version
pub const PRODUCER_NAME: &str = "attention-flux";
