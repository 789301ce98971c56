//! Memory backpressure
//!
//! Ingestion samples process memory once per call, before any mutation. Above
//! the hard limit the whole call is dropped. The same sample feeds the health
//! report polled by the external monitor.

use crate::config::BackpressureConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Source of the current heap usage in MB
pub trait HeapProbe: Send + Sync {
    fn heap_used_mb(&self) -> f64;
}

/// Probe backed by the process resident set size
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Pid,
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            system: Mutex::new(system),
            pid,
        }
    }
}

impl HeapProbe for ProcessMemoryProbe {
    fn heap_used_mb(&self) -> f64 {
        let Ok(mut system) = self.system.lock() else {
            return 0.0;
        };
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]));

        system
            .process(self.pid)
            .map(|process| process.memory() as f64 / 1024.0 / 1024.0)
            .unwrap_or(0.0)
    }
}

/// Probe reporting a settable value, for simulation and tests
#[derive(Debug, Default)]
pub struct FixedHeapProbe {
    bits: AtomicU64,
}

impl FixedHeapProbe {
    pub fn new(mb: f64) -> Self {
        Self {
            bits: AtomicU64::new(mb.to_bits()),
        }
    }

    pub fn set(&self, mb: f64) {
        self.bits.store(mb.to_bits(), Ordering::Relaxed);
    }
}

impl HeapProbe for FixedHeapProbe {
    fn heap_used_mb(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Outcome of a backpressure check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted { heap_mb: f64 },
    Rejected { heap_mb: f64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Memory pressure classification for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Normal,
    High,
    Critical,
    Emergency,
}

/// Gate in front of every ingestion call
pub struct BackpressureGuard {
    config: BackpressureConfig,
    probe: Arc<dyn HeapProbe>,
}

impl BackpressureGuard {
    pub fn new(config: BackpressureConfig, probe: Arc<dyn HeapProbe>) -> Self {
        Self { config, probe }
    }

    /// Sample memory and decide whether this call may mutate anything
    pub fn check(&self) -> Admission {
        let heap_mb = self.probe.heap_used_mb();

        if heap_mb > self.config.heap_limit_mb {
            log::warn!(
                "Memory pressure detected: {}MB. Skipping attention snapshot.",
                heap_mb.round()
            );
            Admission::Rejected { heap_mb }
        } else {
            Admission::Admitted { heap_mb }
        }
    }

    pub fn heap_used_mb(&self) -> f64 {
        self.probe.heap_used_mb()
    }

    /// Whether a given reading would be admitted, without logging
    fn check_value(&self, heap_mb: f64) -> bool {
        heap_mb <= self.config.heap_limit_mb
    }

    pub fn classify(&self, heap_mb: f64) -> MemoryPressure {
        if heap_mb > self.config.emergency_mb {
            MemoryPressure::Emergency
        } else if heap_mb > self.config.critical_mb {
            MemoryPressure::Critical
        } else if heap_mb > self.config.high_mb {
            MemoryPressure::High
        } else {
            MemoryPressure::Normal
        }
    }
}

/// Snapshot of process health exposed to the external monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub heap_used_mb: f64,
    pub pressure: MemoryPressure,
    /// Meetings with live ingestion side state
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Shedding,
}

impl HealthReport {
    pub fn new(
        guard: &BackpressureGuard,
        uptime_secs: u64,
        active_sessions: usize,
    ) -> Self {
        let heap_used_mb = guard.heap_used_mb();
        let pressure = guard.classify(heap_used_mb);

        let status = if !guard.check_value(heap_used_mb) {
            HealthStatus::Shedding
        } else if pressure > MemoryPressure::Normal {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        Self {
            status,
            uptime_secs,
            heap_used_mb: (heap_used_mb * 100.0).round() / 100.0,
            pressure,
            active_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(mb: f64) -> (BackpressureGuard, Arc<FixedHeapProbe>) {
        let probe = Arc::new(FixedHeapProbe::new(mb));
        let guard = BackpressureGuard::new(BackpressureConfig::default(), probe.clone());
        (guard, probe)
    }

    #[test]
    fn test_threshold() {
        let (guard, probe) = guard(1799.9);
        assert!(guard.check().is_admitted());

        probe.set(1800.0);
        assert!(guard.check().is_admitted());

        probe.set(1800.1);
        assert_eq!(guard.check(), Admission::Rejected { heap_mb: 1800.1 });
    }

    #[test]
    fn test_classify() {
        let (guard, _) = guard(0.0);
        assert_eq!(guard.classify(100.0), MemoryPressure::Normal);
        assert_eq!(guard.classify(1500.0), MemoryPressure::Normal);
        assert_eq!(guard.classify(1600.0), MemoryPressure::High);
        assert_eq!(guard.classify(2100.0), MemoryPressure::Critical);
        assert_eq!(guard.classify(2600.0), MemoryPressure::Emergency);
    }

    #[test]
    fn test_health_report() {
        let (guard, probe) = guard(512.0);
        let report = HealthReport::new(&guard, 30, 2);
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.pressure, MemoryPressure::Normal);
        assert_eq!(report.active_sessions, 2);

        probe.set(1700.0);
        assert_eq!(HealthReport::new(&guard, 30, 2).status, HealthStatus::Degraded);

        probe.set(1900.0);
        let report = HealthReport::new(&guard, 30, 2);
        assert_eq!(report.status, HealthStatus::Shedding);
        assert_eq!(report.pressure, MemoryPressure::High);
    }

    #[test]
    fn test_process_probe_reports_something() {
        let probe = ProcessMemoryProbe::new();
        assert!(probe.heap_used_mb() >= 0.0);
    }
}
