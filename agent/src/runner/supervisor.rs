use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, error, info, log, warn, Level};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use common::logging::Logger;

use crate::target::command::{describe_exit, exit_signal};
use crate::target::ServiceTarget;

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// How long output of an exited child is still forwarded. A grandchild holding
/// the pipes open does not keep the forwarders alive past this.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Keeps `service` running until `cancel` fires. Exits and spawn failures are
/// logged and followed by an immediate respawn.
pub async fn supervise(service: &ServiceTarget, cancel: &CancellationToken, log: &Logger) {
    let config_path = service.config_file_path();
    let mut started_once = false;

    while !cancel.is_cancelled() {
        if started_once {
            service.record_restart();
        }
        started_once = true;

        info!(target: log.target(), "Daemon starting: config-path={} command={}", config_path, service.command());
        let mut cmd = service.command().command();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(target: log.target(), "Failed to start daemon: config-path={} err={}", config_path, err);
                service.record_exit(Err(format!("failed to start: {}", err)));
                tokio::task::yield_now().await;
                continue;
            }
        };
        service.record_start(child.id());

        let mut forwarders = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.spawn(forward_lines(stdout, Level::Info, log.clone(), config_path.to_string()));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.spawn(forward_lines(stderr, Level::Warn, log.clone(), config_path.to_string()));
        }

        let waited = cancel.run_until_cancelled(child.wait()).await;
        let status = match waited {
            Some(status) => status,
            None => terminate(&mut child, log, config_path).await,
        };

        match status {
            Ok(status) => {
                if let Some(signal) = exit_signal(&status) {
                    error!(target: log.target(), "Daemon caught signal: config-path={} signal={}", config_path, signal);
                } else {
                    error!(target: log.target(), "Daemon dead: config-path={} {}", config_path, describe_exit(&status));
                }
                service.record_exit(Ok(status));
            }
            Err(err) => {
                error!(target: log.target(), "Failed to wait for daemon: config-path={} err={}", config_path, err);
                service.record_exit(Err(err.to_string()));
            }
        }

        let drained = tokio::time::timeout(OUTPUT_DRAIN, async {
            while forwarders.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!(target: log.target(), "output pipes still open after exit: config-path={}", config_path);
            forwarders.shutdown().await;
        }
    }
}

/// SIGTERM first, SIGKILL once the grace period has passed.
async fn terminate(child: &mut Child, log: &Logger, config_path: &str) -> io::Result<ExitStatus> {
    match child.id() {
        Some(pid) => {
            if let Err(err) = send_sigterm(pid) {
                warn!(target: log.target(), "failed to send SIGTERM: config-path={} pid={} err={}", config_path, pid, err);
            }
        }
        None => return child.wait().await,
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(target: log.target(), "process did not exit after SIGTERM; escalating to SIGKILL: config-path={}", config_path);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "SIGTERM is unix only"))
}

async fn forward_lines<R>(reader: R, level: Level, log: Logger, config_path: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log!(target: log.target(), level, "From daemon: config-path={} msg={}", config_path, line);
    }
}
