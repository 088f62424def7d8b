//! Builder for running external tools (yt-dlp) with a timeout.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

use cb_core::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run the command to completion, capturing stdout and stderr.
    ///
    /// The child is killed only when the timeout elapses. A non-zero exit
    /// status is an [`Error::Tool`] carrying stderr.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let tool = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::tool(&tool, format!("I/O error waiting for process: {e}"))),
            Err(_elapsed) => return Err(Error::tool(&tool, format!("timed out after {:?}", self.timeout))),
        };

        let out = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !out.status.success() {
            return Err(Error::tool(
                tool,
                format!("exited with status {}: {}", out.status, out.stderr.trim()),
            ));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonexistent_tool_is_tool_error() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert!(matches!(result, Err(Error::Tool { .. })));
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let result = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;
        // Minimal environments may lack echo.
        if let Ok(out) = result {
            assert!(out.stdout.contains("hello"));
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("5")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        // Spawn may fail where sleep is missing; either way a tool error.
        assert!(matches!(result, Err(Error::Tool { .. })));
    }
}
