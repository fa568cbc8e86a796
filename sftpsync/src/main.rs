use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use sftpsync::app::{App, log_report};
use sftpsync::config::{DEFAULT_CONFIG_PATH, DEFAULT_CREDENTIALS_PATH, SyncConfig, load_credentials};
use sftpsync::logging::init_logging;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run {
        config: PathBuf,
        credentials: PathBuf,
    },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut credentials = PathBuf::from(DEFAULT_CREDENTIALS_PATH);
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = args
                    .next()
                    .map(PathBuf::from)
                    .context("--config needs a path")?;
            }
            "--credentials" => {
                credentials = args
                    .next()
                    .map(PathBuf::from)
                    .context("--credentials needs a path")?;
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run {
        config,
        credentials,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            if tracing::dispatcher::has_been_set() {
                tracing::error!("{err:#}");
            } else {
                eprintln!("[sftpsync] {err:#}");
            }
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<u8> {
    let (config_path, credentials_path) = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: sftpsync [--config <path>] [--credentials <path>]");
            println!("  --config <path>        Run settings (default {DEFAULT_CONFIG_PATH})");
            println!("  --credentials <path>   SFTP login (default {DEFAULT_CREDENTIALS_PATH})");
            return Ok(0);
        }
        CliMode::Run {
            config,
            credentials,
        } => (config, credentials),
    };

    let config = SyncConfig::load(&config_path)?;
    init_logging(&config.log_level, config.log_file.as_deref())?;
    let credentials = load_credentials(&credentials_path)?;
    tracing::info!(
        local_root = %config.local_root.display(),
        remote_root = %config.remote_root,
        workers = config.workers,
        keep_latest_only = config.keep_latest_only,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received, stopping");
                signal_token.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "cannot listen for interrupts"),
        }
    });

    let app = App::bootstrap(config, &credentials).await?;
    let report = app.run(shutdown).await;
    signal_handle.abort();
    let report = report?;
    log_report(&report);
    Ok(report.exit_code())
}
