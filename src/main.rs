//! airsniff binary
//!
//! Puts a wireless interface into monitor mode, records every frame it sees
//! into a capture project and restores the interface on exit.

use airsniff::{
    daemon::{config::DEFAULT_CONFIG_PATH, DaemonBuilder, DaemonUtils, RunSummary, SnifferConfig},
    Result, SniffError, SniffType,
};
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use std::{path::PathBuf, process};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("airsniff")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Capture 802.11 frames in monitor mode and record them into a capture project")
        .arg(
            Arg::new("interface")
                .value_name("INTERFACE")
                .help("Wireless interface to capture on [default: wlan1]"),
        )
        .arg(
            Arg::new("project")
                .short('p')
                .long("project")
                .value_name("ID")
                .value_parser(value_parser!(i64))
                .help("Record into an existing project instead of creating one"),
        )
        .arg(
            Arg::new("channel")
                .short('c')
                .long("channel")
                .value_name("N")
                .value_parser(value_parser!(u16))
                .help("Fix the interface to one channel"),
        )
        .arg(
            Arg::new("internal")
                .short('i')
                .long("internal")
                .help("Tag observations as internal (default)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("external")
                .short('e')
                .long("external")
                .help("Tag observations as external")
                .action(ArgAction::SetTrue),
        )
        .group(ArgGroup::new("sniff-type").args(["internal", "external"]))
        .arg(
            Arg::new("db")
                .long("db")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("SQLite database path (env AIRSNIFF_DB_PATH)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_CONFIG_PATH)
                .help("Configuration file (toml, json or yaml)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("gpsd")
                .long("gpsd")
                .value_name("HOST:PORT")
                .help("gpsd address (env AIRSNIFF_GPSD_ADDR)"),
        )
        .arg(
            Arg::new("no-gps")
                .long("no-gps")
                .help("Do not record positions")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("drain-timeout")
                .long("drain-timeout")
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("How long to wait for queued observations on shutdown"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Do not echo observations to stdout")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    // Configuration is loaded before logging so the file can pick the level
    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let loaded = SnifferConfig::load_or_default(&config_path);

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .or_else(|| loaded.as_ref().ok().map(|c| c.general.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("{}", e);
        process::exit(2);
    }

    info!("Starting airsniff v{}", env!("CARGO_PKG_VERSION"));

    if !DaemonUtils::is_privileged() {
        error!("airsniff requires root privileges to change interface modes and capture frames");
        process::exit(1);
    }

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{} ({})", e, config_path.display());
            process::exit(1);
        }
    };
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, &matches);
    config.general.log_level = log_level;

    match run(config).await {
        Ok(summary) => {
            if let Some(reason) = &summary.capture_error {
                error!("Capture ended with an error: {}", reason);
                process::exit(1);
            }
            info!("airsniff shutdown complete");
        }
        Err(e) => {
            error!("airsniff error: {}", e);
            process::exit(1);
        }
    }
}

/// Initialize logging system
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| SniffError::Config(format!("Invalid log level '{}': {}", level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

fn apply_cli_overrides(config: &mut SnifferConfig, matches: &ArgMatches) {
    if let Some(interface) = matches.get_one::<String>("interface") {
        config.capture.interface = interface.clone();
    }
    if let Some(project) = matches.get_one::<i64>("project") {
        config.capture.project = Some(*project);
    }
    if let Some(channel) = matches.get_one::<u16>("channel") {
        config.capture.channel = Some(*channel);
    }
    if matches.get_flag("external") {
        config.capture.sniff_type = SniffType::External;
    } else if matches.get_flag("internal") {
        config.capture.sniff_type = SniffType::Internal;
    }
    if let Some(db) = matches.get_one::<PathBuf>("db") {
        config.storage.db_path = db.clone();
    }
    if let Some(addr) = matches.get_one::<String>("gpsd") {
        config.gps.gpsd_addr = addr.clone();
    }
    if matches.get_flag("no-gps") {
        config.gps.enabled = false;
    }
    if let Some(secs) = matches.get_one::<u64>("drain-timeout") {
        config.ingest.drain_timeout_secs = *secs;
    }
    if matches.get_flag("quiet") {
        config.general.quiet = true;
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => info!("Received SIGINT, initiating graceful shutdown"),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                ctrl_c().await;
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run(config: SnifferConfig) -> Result<RunSummary> {
    info!(
        "Capturing on {} into {}",
        config.capture.interface,
        config.storage.db_path.display()
    );

    let drain_timeout = config.ingest.drain_timeout();
    let daemon = DaemonBuilder::new().with_config(config).build()?;
    let summary = daemon.run(shutdown_signal()).await?;

    match &summary.writer {
        Some(stats) => info!(
            "Project {}: {} observations written, {} failed, {} reconnects",
            summary.project_id, stats.written, stats.failed, stats.reconnects
        ),
        None => warn!(
            "Project {}: writer did not finish draining within {:?}",
            summary.project_id, drain_timeout
        ),
    }
    if !summary.interface_restored {
        warn!("Interface may still be in monitor mode");
    }

    Ok(summary)
}
