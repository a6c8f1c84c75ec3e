use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use common::error::{Error, Result};

/// Executable plus arguments, as configured for scripts, cron jobs and
/// services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(path: PathBuf, args: Vec<String>) -> Self {
        Self { path, args }
    }

    /// A command that is killed if its handle is dropped, so abandoning the
    /// future that owns it also stops the process.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs `spec` to completion and returns its stdout.
///
/// A spawn failure, a nonzero exit or cancellation is an error; the error of a
/// failed run carries the exit status and whatever the process wrote to stderr.
pub async fn run_to_completion(spec: &CommandSpec, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let mut cmd = spec.command();
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = match cancel.run_until_cancelled(cmd.output()).await {
        Some(output) => output.map_err(|e| Error::Command(format!("failed to start {}: {}", spec, e)))?,
        None => return Err(Error::Cancelled),
    };
    if !output.status.success() {
        let mut msg = describe_exit(&output.status);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim_end();
        if !stderr.is_empty() {
            msg.push('\n');
            msg.push_str(stderr);
        }
        return Err(Error::Command(msg));
    }
    Ok(output.stdout)
}

pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        format!("exited with code {}", code)
    } else if let Some(signal) = exit_signal(status) {
        format!("terminated by signal {}", signal)
    } else {
        "process exited".to_string()
    }
}

pub fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }

    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new(PathBuf::from("/bin/sh"), vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_to_completion(&sh("echo up 1"), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, b"up 1\n");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_status_and_stderr() {
        let err = run_to_completion(&sh("echo broken >&2; exit 3"), &CancellationToken::new())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with code 3"), "{}", msg);
        assert!(msg.contains("broken"), "{}", msg);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let spec = CommandSpec::new(PathBuf::from("/nonexistent/cradle-test-binary"), vec![]);
        let err = run_to_completion(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_process() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_to_completion(&sh("sleep 5"), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
