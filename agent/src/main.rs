use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::sync::mpsc;

use agent::config::cli::Args;
use agent::cradle::Cradle;
use agent::logger;
use agent::metrics::Metrics;
use common::logging::Logger;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let handle = match logger::init(args.log_level, args.standard_log) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("failed to initialize logging: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(args, handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, handle: log4rs::Handle) -> Result<()> {
    let config = args
        .load_config()
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if config.cli.standard_log && !args.standard_log {
        logger::reconfigure(&handle, args.log_level, true)?;
    }

    let log = Logger::new("cradle_exporter");
    let metrics = Metrics::new().context("failed to register metrics")?;
    let cradle = Arc::new(Cradle::new(metrics, log.clone())?);

    if args.test_config {
        cradle.check(&config).context("config check failed")?;
        info!(target: log.target(), "config ok: {}", args.config.display());
        return Ok(());
    }

    cradle.reload(config).await.context("failed to start")?;

    let signals = Signals::new([SIGINT, SIGTERM, SIGHUP]).context("failed to install signal handlers")?;
    let signals_handle = signals.handle();
    let (tx, mut rx) = mpsc::channel(4);
    let forwarder = thread::spawn(move || {
        let mut signals = signals;
        for signal in signals.forever() {
            if tx.blocking_send(signal).is_err() {
                break;
            }
        }
    });

    let running = tokio::spawn({
        let cradle = cradle.clone();
        async move { cradle.run().await }
    });
    info!(target: log.target(), "cradle_exporter started");

    while let Some(signal) = rx.recv().await {
        match signal {
            SIGHUP => {
                info!(target: log.target(), "reloading config");
                match args.load_config() {
                    Ok(config) => {
                        if let Err(err) = cradle.reload(config).await {
                            error!(target: log.target(), "reload rejected, keeping current config: {}", err);
                        }
                    }
                    Err(err) => error!(target: log.target(), "reload rejected, keeping current config: {}", err),
                }
            }
            _ => {
                info!(target: log.target(), "received signal {}, shutting down", signal);
                break;
            }
        }
    }

    cradle.shutdown().await;
    signals_handle.close();
    if forwarder.join().is_err() {
        warn!(target: log.target(), "signal thread panicked");
    }
    running.await.context("cradle task failed")??;
    info!(target: log.target(), "cradle_exporter stopped");
    Ok(())
}
