//! Triage bot entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > TRIAGE_LOG_LEVEL > config)
//!   4. Init logger once
//!   5. Build the triage context (labels, tools, knowledge store, model)
//!   6. `--ingest <dir>`: index the directory and exit
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Run comms channels until shutdown

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::level_filters::LevelFilter;

use triage_bot::comms::{self, CommsState};
use triage_bot::config::{self, Config};
use triage_bot::error::AppError;
use triage_bot::logger;
use triage_bot::triage::TriageContext;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut config = config::load(args.config_path.as_deref())?;

    // Without -i the console stays closed (daemon-safe default).
    if !args.interactive {
        config.comms.pty.enabled = false;
    }

    let effective_log_level = logger::effective_level(args.log_level, &config.log_level)?;
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        bot_name = %config.bot_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        interactive = %args.interactive,
        "config loaded"
    );

    std::fs::create_dir_all(&config.work_dir)?;
    let context = Arc::new(TriageContext::build(&config)?);

    if let Some(dir) = args.ingest_dir {
        let stats = context.knowledge.ingest_dir(&dir).await?;
        println!(
            "✓ Indexed {} file(s): {} chunk(s), {} new, {} already present",
            stats.files,
            stats.chunks,
            stats.inserted,
            stats.duplicates()
        );
        return Ok(());
    }

    let passages = context
        .knowledge
        .count()
        .await
        .map_err(AppError::from)?;
    print_startup_summary(&config, &context, passages, args.interactive);

    let shutdown = CancellationToken::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let state = Arc::new(CommsState::new(context));
    let channels = comms::start(&config, state, shutdown.clone());
    channels.join().await?;

    shutdown.cancel();

    if args.interactive {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }

    Ok(())
}

fn print_startup_summary(config: &Config, context: &TriageContext, passages: usize, interactive: bool) {
    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        let char_count = text.chars().count();
        if char_count >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let mode_text = if interactive { "interactive" } else { "daemon" };

    let mut comms_lines = Vec::new();
    let pty_status = if config.comms.pty.enabled { "enabled" } else { "disabled" };
    comms_lines.push(format!("⌨️  pty: {pty_status}"));
    if config.comms.axum_channel.enabled {
        comms_lines.push(format!("🧩 http: {}", config.comms.axum_channel.bind));
    } else {
        comms_lines.push("🧩 http: disabled".to_string());
    }
    #[cfg(not(feature = "channel-axum"))]
    if config.comms.axum_channel.enabled {
        comms_lines.push("🧩 http: configured but not compiled in".to_string());
    }

    let llm_line = format!(
        "provider={} model={} temp={} timeout={}s",
        context.dispatcher.llm().name(),
        config.llm.openai.model,
        config.llm.openai.temperature,
        config.llm.openai.timeout_seconds
    );
    let tools_line = context
        .dispatcher
        .tool_kinds()
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let labels_line = if context.labels.is_fallback() {
        format!("{} labels (built-in fallback)", context.labels.len())
    } else {
        format!("{} labels from {}", context.labels.len(), config.triage.labels_path.display())
    };
    let knowledge_line = format!(
        "{passages} passages, threshold={} top_k={}",
        config.knowledge.score_threshold, config.knowledge.top_k
    );

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ 🩺 Triage Bot Status                                         ║");
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧾 Bot: {:<52}║", config.bot_name);
    println!("║ 🧠 PID: {:<52}║", std::process::id());
    println!("║ 🛰️  Mode: {:<51}║", mode_text);
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 📡 Comms                                                     ║");
    for line in comms_lines {
        println!("║   {}║", fit(line));
    }
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧠 LLM                                                       ║");
    println!("║   {}║", fit(llm_line));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧰 Tools                                                     ║");
    println!("║   {}║", fit(tools_line));
    println!("║   {}║", fit(labels_line));
    println!("║   {}║", fit(knowledge_line));
    println!("╚══════════════════════════════════════════════════════════════╝");

    if interactive {
        println!("💡 Type /help for help");
    }
}

// Basic parsing keeps the binary lean; there are only a handful of flags.
struct CliArgs {
    log_level: Option<LevelFilter>,
    interactive: bool,
    config_path: Option<String>,
    ingest_dir: Option<PathBuf>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut config_path = None;
    let mut ingest_dir = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: triage-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -i, --interactive          Run in interactive mode (enables the console)");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("      --ingest <DIR>         Index .md/.txt files under DIR into the knowledge store and exit");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            },
            "--ingest" => match iter.next() {
                Some(dir) => ingest_dir = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("error: --ingest requires a directory argument");
                    std::process::exit(1);
                }
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    //   -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some(LevelFilter::WARN),
        2 => Some(LevelFilter::INFO),
        3 => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    };

    CliArgs { log_level, interactive, config_path, ingest_dir }
}
