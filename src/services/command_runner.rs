//! Shell command execution with a timeout, shared by the testing specialist
//! and command quality gates.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};

/// Characters of output kept in [`CommandOutcome::tail`].
const TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// `None` when the process was killed by the timeout or a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Last part of stdout followed by stderr.
    pub tail: String,
    pub duration_ms: u64,
}

impl CommandOutcome {
    pub fn summary(&self) -> String {
        if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Run `command` through `sh -c`. Spawn failures are errors; a non-zero exit
/// or a timeout is an unsuccessful outcome.
#[instrument(skip_all, fields(command = %command))]
pub async fn run_shell(command: &str, timeout: Duration) -> DomainResult<CommandOutcome> {
    let start = Instant::now();
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DomainError::StorageError(format!("failed to spawn '{command}': {e}")))?;

    let outcome = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            CommandOutcome {
                success: output.status.success(),
                exit_code: output.status.code(),
                timed_out: false,
                tail: tail(&text),
                duration_ms: elapsed_ms(start),
            }
        }
        Err(_) => CommandOutcome {
            success: false,
            exit_code: None,
            timed_out: true,
            tail: String::new(),
            duration_ms: elapsed_ms(start),
        },
    };
    debug!(success = outcome.success, duration_ms = outcome.duration_ms, "Command finished");
    Ok(outcome)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= TAIL_CHARS {
        return text.trim_end().to_string();
    }
    text.chars().skip(count - TAIL_CHARS).collect::<String>().trim_end().to_string()
}
