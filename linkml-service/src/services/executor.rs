use crate::error::CapabilityError;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// An external program plus its fixed leading arguments.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Runs external tools with a deadline; the child is killed if the deadline
/// passes or the calling future is dropped.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `tool` with `input` appended as the last argument and returns the
    /// raw output whatever the exit status.
    pub async fn run(&self, tool: &ToolCommand, input: &Path) -> Result<Output, CapabilityError> {
        let mut cmd = Command::new(&tool.program);
        cmd.args(&tool.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            program = %tool.program,
            args = ?tool.args,
            input = %input.display(),
            timeout_secs = %self.timeout.as_secs(),
            "Executing command"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CapabilityError::Timeout {
                tool: tool.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| CapabilityError::Spawn {
                tool: tool.program.clone(),
                source,
            })?;

        tracing::debug!(
            program = %tool.program,
            status = %output.status,
            output_size = output.stdout.len(),
            "Command finished"
        );

        Ok(output)
    }

    /// Like [`run`](Self::run) but treats a non-zero exit as a failure.
    pub async fn run_checked(
        &self,
        tool: &ToolCommand,
        input: &Path,
    ) -> Result<Output, CapabilityError> {
        let output = self.run(tool, input).await?;

        if !output.status.success() {
            return Err(failed(tool, &output));
        }

        Ok(output)
    }
}

pub(crate) fn failed(tool: &ToolCommand, output: &Output) -> CapabilityError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    tracing::error!(
        program = %tool.program,
        args = ?tool.args,
        status = %output.status,
        stderr = %stderr,
        "Command failed"
    );
    CapabilityError::ToolFailed {
        tool: tool.program.clone(),
        status: output.status.to_string(),
        stderr,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    fn input_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let file = input_file("name: my_schema\n");
        let executor = CommandExecutor::new(Duration::from_secs(5));

        let output = executor
            .run_checked(&ToolCommand::new("cat", vec![]), file.path())
            .await
            .unwrap();

        assert_eq!(output.stdout, b"name: my_schema\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_with_stderr() {
        let file = input_file("");
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let tool = ToolCommand::new(
            "sh",
            vec!["-c".into(), "echo broken >&2; exit 3".into()],
        );

        let err = executor.run_checked(&tool, file.path()).await.unwrap_err();
        match err {
            CapabilityError::ToolFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other:?}"),
        }

        let output = executor.run(&tool, file.path()).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let file = input_file("");
        let executor = CommandExecutor::new(Duration::from_millis(100));
        let tool = ToolCommand::new("sh", vec!["-c".into(), "sleep 5".into()]);

        let err = executor.run(&tool, file.path()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let file = input_file("");
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let tool = ToolCommand::new("definitely-not-an-installed-tool", vec![]);

        let err = executor.run(&tool, file.path()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Spawn { .. }));
    }
}
