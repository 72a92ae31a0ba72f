//! External tool execution.
//!
//! Every probe that shells out goes through `run_tool`, which runs the
//! child under `tokio::process::Command` with a hard deadline and kills it
//! if the deadline passes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::{DiscoverError, Result};

/// Captured output of a finished tool invocation.
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Locate an executable: a path containing a separator is checked as-is,
/// a bare name is searched for on `PATH`.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Run `tool args…`, failing with `ProbeTimeout` if it outlives `timeout`
/// and with `ToolFailed` if it exits non-zero.
pub async fn run_tool(tool: &str, args: &[String], timeout: Duration) -> Result<ToolOutput> {
    let start = Instant::now();
    tracing::debug!(tool = %tool, args = ?args, timeout_ms = timeout.as_millis(), "Running tool");

    let child = Command::new(tool)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(DiscoverError::ToolFailed {
                tool: tool.to_string(),
                code: -1,
                stderr: e.to_string(),
            })
        }
        Err(_) => {
            return Err(DiscoverError::ProbeTimeout {
                probe: tool.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(DiscoverError::ToolFailed {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_not_found() {
        assert!(find_binary("definitely-not-a-real-tool-4711").is_none());
        assert!(find_binary("/nonexistent/dir/nmap").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_tool_failure() {
        let err = run_tool("sh", &["-c".into(), "echo nope >&2; exit 3".into()], Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        match err {
            DiscoverError::ToolFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = run_tool("sleep", &["5".into()], Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DiscoverError::ProbeTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let out = run_tool("echo", &["hello".into()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }
}
