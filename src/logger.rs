//! Logging initialisation via tracing-subscriber.
//!
//! The effective level is picked once in `main`:
//!
//! ```text
//! -v…  (CLI)  >  TRIAGE_LOG_LEVEL  >  [supervisor] log_level
//! ```
//!
//! The env override is already folded into `Config::log_level`, which
//! `config::load` validates with [`parse_level`]. `RUST_LOG` may add
//! per-target directives on top of the configured level, but is ignored when
//! the level came from the command line.

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// HTTP plumbing that floods `debug` with per-connection noise.
const QUIET_TARGETS: &[&str] = &["hyper_util=warn", "h2=warn", "rustls=warn"];

/// Parse a level name (`off`, `error` … `trace`, any case).
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    let level = level.trim();
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

/// Pick the level: a CLI level wins over the configured one.
pub fn effective_level(cli: Option<LevelFilter>, configured: &str) -> Result<LevelFilter, AppError> {
    match cli {
        Some(level) => Ok(level),
        None => parse_level(configured),
    }
}

/// Build the filter for `level`, adding `rust_log` directives when given.
/// Malformed `RUST_LOG` directives are skipped rather than failing startup.
pub fn build_filter(level: LevelFilter, rust_log: Option<&str>) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy("");
    if level > LevelFilter::INFO {
        for quiet in QUIET_TARGETS {
            if let Ok(directive) = quiet.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    for directive in rust_log.unwrap_or_default().split(',').map(str::trim).filter(|d| !d.is_empty()) {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("warning: ignoring RUST_LOG directive '{directive}': {e}"),
        }
    }
    filter
}

/// Install the global subscriber.
///
/// Output goes to stderr unless `log_file` is given, so the console channel
/// keeps stdout for replies. File output carries no ANSI colours.
pub fn init(level: LevelFilter, from_cli: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let rust_log = if from_cli { None } else { std::env::var("RUST_LOG").ok() };
    let filter = build_filter(level, rust_log.as_deref());

    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AppError::Logger(format!("cannot open log file {}: {e}", path.display())))?;
            (BoxMakeWriter::new(file), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| AppError::Logger(format!("subscriber already installed: {e}")))
}
