//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use rk_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> rk_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("exiftool"))
///     .arg("-json")
///     .arg("-n")
///     .arg("/ingest/A001_C002.mov")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
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

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`rk_core::Error::Tool`] if spawning fails, the process times
    /// out, or it exits with a non-zero status (the message then includes
    /// stderr).
    pub async fn execute(&self) -> rk_core::Result<ToolOutput> {
        let tool = self.program_name();
        let child = self
            .command()
            .spawn()
            .map_err(|e| rk_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        // Dropping the future on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| rk_core::Error::tool(&tool, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| rk_core::Error::tool(&tool, format!("I/O error waiting for process: {e}")))?;

        let tool_output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        check_status(&tool, &tool_output)?;
        Ok(tool_output)
    }

    /// Execute the command, handing every stderr line to `on_line` as it is
    /// written. Used for ffmpeg's `-progress pipe:2` stream.
    ///
    /// Stdout is captured as in [`execute`](Self::execute); the returned
    /// `stderr` holds only the last lines, for error messages. Cancelling
    /// `cancel` kills the process.
    pub async fn execute_with_stderr_callback(
        &self,
        mut on_line: impl FnMut(&str),
        cancel: Option<CancellationToken>,
    ) -> rk_core::Result<ToolOutput> {
        let tool = self.program_name();
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| rk_core::Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| rk_core::Error::tool(&tool, "stderr was not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| rk_core::Error::tool(&tool, "stdout was not captured"))?;
        let cancel = cancel.unwrap_or_default();

        let run = async {
            let stdout_task = async {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).await.map(|_| buf)
            };
            let stderr_task = async {
                let mut tail = StderrTail::default();
                let mut lines = BufReader::new(stderr).lines();
                while let Some(line) = lines.next_line().await? {
                    on_line(&line);
                    tail.push(line);
                }
                Ok::<_, std::io::Error>(tail)
            };
            let (stdout, tail) = tokio::try_join!(stdout_task, stderr_task)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, tail))
        };

        let (status, stdout, tail) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(rk_core::Error::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, run) => result
                .map_err(|_| rk_core::Error::tool(&tool, format!("timed out after {:?}", self.timeout)))?
                .map_err(|e| rk_core::Error::tool(&tool, format!("I/O error waiting for process: {e}")))?,
        };

        let tool_output = ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: tail.into_string(),
        };
        check_status(&tool, &tool_output)?;
        Ok(tool_output)
    }
}

fn check_status(tool: &str, output: &ToolOutput) -> rk_core::Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(rk_core::Error::tool(
        tool,
        format!("exited with status {}: {}", output.status, output.stderr.trim()),
    ))
}

/// The last few stderr lines of a streamed process.
#[derive(Default)]
struct StderrTail {
    lines: std::collections::VecDeque<String>,
}

impl StderrTail {
    const KEEP: usize = 20;

    fn push(&mut self, line: String) {
        if self.lines.len() == Self::KEEP {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("failed to spawn"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn timeout_fires() {
        // `sleep 10` should be killed well before 10 seconds.
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn stderr_lines_are_streamed() {
        let mut lines = Vec::new();
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo out; echo frame=1 >&2; echo progress=end >&2"])
            .execute_with_stderr_callback(|line| lines.push(line.to_string()), None)
            .await;

        if let Ok(out) = result {
            assert_eq!(out.stdout.trim(), "out");
            assert_eq!(lines, vec!["frame=1", "progress=end"]);
            assert_eq!(out.stderr, "frame=1\nprogress=end");
        }
    }

    #[tokio::test]
    async fn streamed_failure_reports_stderr_tail() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo broken input >&2; exit 3"])
            .execute_with_stderr_callback(|_| {}, None)
            .await;

        if let Err(rk_core::Error::Tool { message, .. }) = result {
            assert!(message.contains("broken input"), "{message}");
        }
    }

    #[tokio::test]
    async fn cancellation_kills_streamed_process() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .execute_with_stderr_callback(|_| {}, Some(cancel))
            .await;
        // Spawn may fail where `sleep` is missing; either way no success.
        assert!(result.is_err());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let mut tail = StderrTail::default();
        for i in 0..30 {
            tail.push(format!("line {i}"));
        }
        let text = tail.into_string();
        assert!(text.starts_with("line 10"));
        assert!(text.ends_with("line 29"));
    }
}
