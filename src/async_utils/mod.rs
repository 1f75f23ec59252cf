//! Asynchronous utilities for use with Tokio.

use std::{pin::Pin, process::Output};

use futures::Stream;
use tokio::process::Command;

use crate::{cpu_limit::with_cpu_semaphore, prelude::*};

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Report any command failures, and include any error output.
///
/// The output of standard error and standard output will be logged at
/// appropriate levels. And standard error may be optionally checked against a
/// predicate to determine if the command failed.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );
    if !stderr.trim().is_empty() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(is_error_line)
        {
            return Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Run a CPU-heavy external command while holding a CPU permit, and capture
/// its output.
///
/// If the returned future is dropped (for example, by a page timeout), the
/// child process is killed along with it.
pub async fn run_cpu_bound_command(mut command: Command, command_name: &str) -> Result<Output> {
    command.kill_on_drop(true);
    with_cpu_semaphore(|| async move {
        command
            .output()
            .await
            .with_context(|| format!("cannot run {}", command_name))
    })
    .await
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        // Propagate any panics from the blocking task.
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt as _, process::ExitStatus};

    use super::*;

    fn output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: vec![],
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn command_failures_are_reported() {
        assert!(check_for_command_failure("true", &output(0, ""), None).is_ok());
        let err = check_for_command_failure("false", &output(1, "boom"), None)
            .unwrap_err()
            .to_string();
        assert!(err.contains("exit code 1"));
        assert!(err.contains("boom"));
    }

    #[test]
    fn error_lines_fail_successful_commands() {
        let is_error = |line: &str| line.to_lowercase().contains("error");
        let result =
            check_for_command_failure("pdftocairo", &output(0, "Error: bad"), Some(&is_error));
        assert!(result.is_err());
        let result =
            check_for_command_failure("pdftocairo", &output(0, "Warning: odd"), Some(&is_error));
        assert!(result.is_ok());
    }

    /// Is `pid` gone? Zombies waiting to be reaped count as gone.
    fn process_is_gone(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn timed_out_commands_are_killed() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("command-test")?;
        let pid_path = dir.path().join("pid");
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(r#"echo $$ > "$0"; exec sleep 30"#)
            .arg(&pid_path);

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            run_cpu_bound_command(command, "sleep"),
        )
        .await;
        assert!(result.is_err(), "command should have timed out");

        let pid = std::fs::read_to_string(&pid_path)?.trim().to_owned();
        let mut gone = false;
        for _ in 0..50 {
            if process_is_gone(&pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(gone, "process {pid} is still running");
        Ok(())
    }

    #[tokio::test]
    async fn commands_report_output() -> Result<()> {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo hello");
        let output = run_cpu_bound_command(command, "sh").await?;
        check_for_command_failure("sh", &output, None)?;
        assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
        Ok(())
    }

    #[tokio::test]
    async fn blocking_tasks_return_values() {
        let value = spawn_blocking_propagating_panics(|| 6 * 7).await;
        assert_eq!(value, 42);
    }
}
