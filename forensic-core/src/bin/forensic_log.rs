//! Forensic log tool - inspect and convert recorded sessions
//!
//! Usage:
//!     forensic-log summary "captures/*.jsonl"
//!     forensic-log summary --raw chrome_debug.log --json
//!     forensic-log convert chrome_debug.log -o capture.jsonl
//!     forensic-log check "captures/*.jsonl"
//!
//! Log verbosity follows `FORENSIC_LOG` (or `RUST_LOG`).

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use forensic_core::transport::raw::RawLogParser;
use forensic_core::{
    Event, EventKind, ForensicError, JsonlFileTransport, LogRecord, LogTransport, MemoryTransport, Session,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "forensic-log")]
#[command(about = "Inspect and convert forensic record/replay logs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load logs into a session and print what a replay would see
    Summary {
        /// Files or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Inputs are raw instrumented-browser logs, not JSONL
        #[arg(long)]
        raw: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a raw instrumented-browser log to JSONL
    Convert {
        input: PathBuf,

        /// Output JSONL file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Validate JSONL logs and check that every stream's sequence numbers
    /// increase
    Check {
        /// Files or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("FORENSIC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "forensic_core=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Summary { inputs, raw, json } => summary(&inputs, raw, json),
        Command::Convert { input, output } => convert(&input, &output),
        Command::Check { inputs } => check(&inputs),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

/// Expand every pattern; plain paths pass through even if they do not exist
fn expand(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        match glob::glob(pattern) {
            Ok(matches) => {
                let before = paths.len();
                paths.extend(matches.filter_map(|entry| entry.ok()));
                if paths.len() == before {
                    paths.push(PathBuf::from(pattern));
                }
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "bad glob pattern, using as path");
                paths.push(PathBuf::from(pattern));
            }
        }
    }
    paths
}

fn read_raw(path: &Path) -> Result<Vec<Event>, ForensicError> {
    let file = File::open(path).map_err(|e| ForensicError::Io {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    let mut parser = RawLogParser::new();
    let events = parser.parse_reader(BufReader::new(file))?;
    let stats = parser.stats();
    tracing::info!(
        path = %path.display(),
        lines = stats.lines,
        events = stats.events,
        malformed = stats.malformed,
        "raw log parsed"
    );
    Ok(events)
}

fn summary(inputs: &[String], raw: bool, json: bool) -> Result<ExitCode, ForensicError> {
    let staging = MemoryTransport::new();
    for path in expand(inputs) {
        let records: Vec<LogRecord> = if raw {
            read_raw(&path)?.into_iter().map(LogRecord::new).collect()
        } else {
            JsonlFileTransport::open_lenient(&path).records()?
        };
        staging.append_batch(&records)?;
    }

    let session = Session::new()?;
    session.enable();
    session.load_log(&staging)?;
    let stats = session.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Events: {}", stats.store.events);
    println!("Streams: {}", stats.store.streams);
    for (kind, count) in &stats.store.by_kind {
        println!("  {:<20} {}", kind.as_str(), count);
    }
    println!("Responses: {}", stats.resources.responses);
    if stats.resources.duplicates > 0 {
        println!("  duplicates ignored: {}", stats.resources.duplicates);
    }
    Ok(ExitCode::SUCCESS)
}

fn convert(input: &Path, output: &Path) -> Result<ExitCode, ForensicError> {
    let records: Vec<LogRecord> = read_raw(input)?.into_iter().map(LogRecord::new).collect();
    let transport = JsonlFileTransport::new(output)?;
    transport.append_batch(&records)?;
    transport.flush()?;
    println!("Wrote {} events to {}", records.len(), output.display());
    Ok(ExitCode::SUCCESS)
}

fn check(inputs: &[String]) -> Result<ExitCode, ForensicError> {
    let mut failed = 0;
    for path in expand(inputs) {
        let records = match JsonlFileTransport::new(&path)?.records() {
            Ok(records) => records,
            Err(e) => {
                failed += 1;
                println!("FAIL  {}: {}", path.display(), e);
                continue;
            }
        };

        let violations = sequence_violations(&records);
        if violations.is_empty() {
            println!("ok    {} ({} events)", path.display(), records.len());
            continue;
        }
        failed += 1;
        println!("FAIL  {}: {} out-of-order events", path.display(), violations.len());
        for (kind, key, previous, sequence) in violations.iter().take(10) {
            println!("      {} {}: {} after {}", kind, key, sequence, previous);
        }
    }
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Events whose sequence number does not exceed the previous one on the
/// same stream, in file order
fn sequence_violations(records: &[LogRecord]) -> Vec<(EventKind, String, i64, i64)> {
    let mut last: HashMap<(EventKind, String), i64> = HashMap::new();
    let mut violations = Vec::new();
    for record in records {
        let event = &record.event;
        let id = (event.kind(), event.stream_key());
        if let Some(previous) = last.get(&id) {
            if event.sequence_number <= *previous {
                violations.push((id.0, id.1.clone(), *previous, event.sequence_number));
            }
        }
        last.insert(id, event.sequence_number);
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use forensic_core::{EventPayload, Phase};

    fn timer(frame: &str, sequence: i64) -> LogRecord {
        LogRecord::new(Event::new(
            frame,
            sequence,
            0.0,
            EventPayload::TimerLifecycle {
                timer_id: sequence,
                phase: Phase::Begin,
            },
        ))
    }

    fn navigation(frame: &str, sequence: i64) -> LogRecord {
        LogRecord::new(Event::new(
            frame,
            sequence,
            0.0,
            EventPayload::Navigation {
                url: "https://x/".to_string(),
            },
        ))
    }

    #[test]
    fn test_out_of_order_sequence_is_reported_per_stream() {
        let records = vec![
            timer("F1", 0),
            timer("F1", 2),
            timer("F2", 0),
            navigation("F1", 0),
            timer("F1", 1),
            timer("F2", 1),
        ];
        let violations = sequence_violations(&records);
        assert_eq!(
            violations,
            vec![(EventKind::TimerLifecycle, "F1".to_string(), 2, 1)]
        );
    }

    #[test]
    fn test_repeated_sequence_is_a_violation() {
        let violations = sequence_violations(&[timer("F1", 3), timer("F1", 3)]);
        assert_eq!(violations.len(), 1);
        assert!(sequence_violations(&[timer("F1", 0), timer("F1", 1)]).is_empty());
    }

    #[test]
    fn test_expand_globs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("c.log"), "").unwrap();

        let pattern = format!("{}/*.jsonl", dir.path().display());
        let mut found = expand(&[pattern]);
        found.sort();
        assert_eq!(found, vec![dir.path().join("a.jsonl"), dir.path().join("b.jsonl")]);

        // an unmatched pattern passes through so the read reports it
        let missing = format!("{}/*.none", dir.path().display());
        assert_eq!(expand(&[missing.clone()]), vec![PathBuf::from(missing)]);
    }
}
