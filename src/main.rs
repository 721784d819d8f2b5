mod backoff;
mod config;
mod monitor;
mod probe;
mod status;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::monitor::{ConnectionMonitor, ManualRetry, MonitorSettings};
use crate::probe::HttpProbe;

fn print_help() {
    println!(
        "\
connwatch v{}

Watches a backend health endpoint, retries with exponential backoff
when it becomes unreachable, and reports connection status.

USAGE:
    connwatch [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/connwatch.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

COMMANDS (stdin):
    r, retry     Retry now (resets the attempt counter)
    s, status    Print the current status as JSON
    q, quit      Stop monitoring and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, connwatch=debug,warn)

EXAMPLES:
    connwatch                               # uses config/connwatch.toml
    connwatch /etc/connwatch/backend.toml   # custom config path
    RUST_LOG=debug connwatch                # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

/// A line typed on stdin.
#[derive(Debug, PartialEq)]
enum UserCommand {
    Retry,
    Status,
    Quit,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<UserCommand> {
    let cmd = line.trim();
    if cmd.is_empty() {
        return None;
    }
    Some(match cmd.to_lowercase().as_str() {
        "r" | "retry" => UserCommand::Retry,
        "s" | "status" => UserCommand::Status,
        "q" | "quit" | "exit" => UserCommand::Quit,
        _ => UserCommand::Unknown(cmd.to_string()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("connwatch v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("connwatch=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/connwatch.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("Health endpoint: {}", config.health.url);
    info!(
        "Retry policy: {} attempts, {}ms base delay, {}ms cap",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
    );

    let probe = Arc::new(HttpProbe::from_config(&config.health));
    let monitor = ConnectionMonitor::start(probe, MonitorSettings::from_config(&config));

    let status_cancel = CancellationToken::new();
    let status_task = tokio::spawn(status::run(
        monitor.subscribe(),
        config.status.format,
        status_cancel.clone(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                break Ok(());
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // stdin closed: keep monitoring until Ctrl-C
                    Ok(None) => {
                        let _ = tokio::signal::ctrl_c().await;
                        info!("Shutdown signal received, exiting");
                        break Ok(());
                    }
                    Err(e) => break Err(anyhow!("Failed to read stdin: {e}")),
                };

                match parse_command(&line) {
                    Some(UserCommand::Retry) => match monitor.retry_now().await {
                        Ok(ManualRetry::Started) => {}
                        Ok(ManualRetry::AlreadyInFlight) => info!("Retry already in progress"),
                        Err(e) => {
                            error!("Manual retry rejected: {e}");
                            break Err(e.into());
                        }
                    },
                    Some(UserCommand::Status) => {
                        let view = monitor.snapshot().view(tokio::time::Instant::now());
                        println!("{}", serde_json::to_string_pretty(&view)?);
                    }
                    Some(UserCommand::Quit) => break Ok(()),
                    Some(UserCommand::Unknown(cmd)) => {
                        warn!("Unknown command '{cmd}' (use r, s or q)");
                    }
                    None => {}
                }
            }
        }
    };

    monitor.dispose().await;
    status_cancel.cancel();
    let _ = status_task.await;

    result
}
