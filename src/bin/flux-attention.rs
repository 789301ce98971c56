//! Flux Attention CLI - Command-line interface for the attention engine
//!
//! Commands:
//! - ingest: Replay ingestion batches through an in-memory engine
//! - analytics: Aggregate a raw attention log
//! - doctor: Diagnose configuration and process health

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use attention_flux::backpressure::{BackpressureGuard, MemoryPressure, ProcessMemoryProbe};
use attention_flux::store::InMemoryStore;
use attention_flux::types::Meeting;
use attention_flux::{
    AttentionEngine, AttentionLog, EngineConfig, EngineError, HealthReport, MeetingAnalytics,
    SignalBatch, FLUX_VERSION, PRODUCER_NAME,
};

/// Flux Attention - Ingest and aggregate live attention signals
#[derive(Parser)]
#[command(name = "flux-attention")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLUX_VERSION)]
#[command(about = "Aggregate per-participant attention signals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay NDJSON ingestion batches through an in-memory engine
    Ingest {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Room id for the replayed meeting
        #[arg(long, default_value = "cli-room")]
        room: String,

        /// Print reconciled statistics after the replay
        #[arg(long)]
        reconcile: bool,

        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Aggregate an NDJSON attention log
    Analytics {
        /// Log file path (use - for stdin)
        #[arg(short, long)]
        logs: PathBuf,

        /// Meeting document (JSON) used for names and duration
        #[arg(long)]
        meeting: Option<PathBuf>,
    },

    /// Diagnose configuration and process health
    Doctor {
        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Ingest {
            input,
            room,
            reconcile,
            config,
        } => cmd_ingest(&input, &room, reconcile, config.as_deref()),

        Commands::Analytics { logs, meeting } => cmd_analytics(&logs, meeting.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_ingest(
    input: &Path,
    room: &str,
    reconcile: bool,
    config: Option<&Path>,
) -> Result<(), FluxCliError> {
    let config = load_config(config)?;
    let input_data = read_input(input)?;

    let mut batches: Vec<(usize, SignalBatch)> = Vec::new();
    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let batch: SignalBatch = serde_json::from_str(trimmed).map_err(|e| {
            FluxCliError::ParseError(format!("Failed to parse batch on line {}: {}", index + 1, e))
        })?;
        batches.push((index + 1, batch));
    }

    if batches.is_empty() {
        return Err(FluxCliError::NoBatches);
    }

    let start = batches
        .iter()
        .filter_map(|(_, b)| b.timestamp)
        .min()
        .unwrap_or_else(Utc::now);

    let engine = AttentionEngine::new(config, Arc::new(InMemoryStore::new()));
    let meeting = engine.start_meeting(room, None, None, start)?;

    let mut last_seen = start;
    for (line, batch) in &batches {
        let at = batch.timestamp.unwrap_or_else(Utc::now);
        last_seen = last_seen.max(at);

        let accepted = engine.ingest(&meeting.id, &batch.signals, at);
        let summary = IngestLine {
            line: *line,
            accepted,
            signals: batch.signals.len(),
        };
        println!("{}", serde_json::to_string(&summary)?);
    }

    if reconcile {
        let updated = engine
            .reconcile_meeting(&meeting.id, last_seen)
            .ok_or(FluxCliError::ReconcileFailed)?;
        println!("{}", serde_json::to_string_pretty(&updated.overall_stats)?);
    }

    Ok(())
}

fn cmd_analytics(logs: &Path, meeting: Option<&Path>) -> Result<(), FluxCliError> {
    let input_data = read_input(logs)?;

    let mut records: Vec<AttentionLog> = Vec::new();
    for (index, line) in input_data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: AttentionLog = serde_json::from_str(trimmed).map_err(|e| {
            FluxCliError::ParseError(format!("Failed to parse log on line {}: {}", index + 1, e))
        })?;
        record.validate()?;
        records.push(record);
    }

    let meeting = match meeting {
        Some(path) => serde_json::from_str::<Meeting>(&fs::read_to_string(path)?)?,
        None => {
            // Without a meeting document, span the log itself
            let first = records
                .iter()
                .min_by_key(|r| r.timestamp)
                .ok_or(FluxCliError::NoBatches)?;
            let mut meeting = Meeting::new(first.room_id.clone(), first.timestamp);
            meeting.id = first.meeting_id.clone();
            meeting.end_time = records.iter().map(|r| r.timestamp).max();
            meeting
        }
    };

    let analytics = MeetingAnalytics::from_logs(&meeting, &records, Utc::now());
    println!("{}", serde_json::to_string_pretty(&analytics)?);

    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "flux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Flux Attention version {}", FLUX_VERSION),
    });

    let engine_config = match config {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, using defaults".to_string(),
            });
            EngineConfig::default()
        }
        Some(path) => match EngineConfig::from_file(path) {
            Ok(parsed) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid (heap limit {} MB, snapshot cap {})",
                        parsed.backpressure.heap_limit_mb, parsed.buffer.snapshot_cap
                    ),
                });
                parsed
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                EngineConfig::default()
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Using built-in defaults".to_string(),
            });
            EngineConfig::default()
        }
    };

    let guard = BackpressureGuard::new(
        engine_config.backpressure.clone(),
        Arc::new(ProcessMemoryProbe::new()),
    );
    let health = HealthReport::new(&guard, 0, 0);
    checks.push(DoctorCheck {
        name: "heap".to_string(),
        status: match health.pressure {
            MemoryPressure::Normal => CheckStatus::Ok,
            MemoryPressure::High => CheckStatus::Warning,
            MemoryPressure::Critical | MemoryPressure::Emergency => CheckStatus::Error,
        },
        message: format!(
            "{:.2} MB used ({:?} pressure, limit {} MB)",
            health.heap_used_mb, health.pressure, engine_config.backpressure.heap_limit_mb
        ),
    });

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Flux Attention Doctor Report");
        println!("============================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, FluxCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, FluxCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoBatches,
    ReconcileFailed,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<EngineError> for FluxCliError {
    fn from(e: EngineError) -> Self {
        FluxCliError::Engine(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Engine(EngineError::ConfigError(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'flux-attention doctor --config <file>' for details".to_string()),
            },
            FluxCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::NoBatches => CliError {
                code: "NO_INPUT".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FluxCliError::ReconcileFailed => CliError {
                code: "RECONCILE_FAILED".to_string(),
                message: "Meeting statistics could not be computed".to_string(),
                hint: Some("Set RUST_LOG=error to see the cause".to_string()),
            },
            FluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            FluxCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be one JSON object".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct IngestLine {
    line: usize,
    accepted: bool,
    signals: usize,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
