use std::path::Path;
use std::time::Duration;

/// Runs one shell command line inside a job's working directory and
/// enforces a wall-clock limit on it.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Sandbox: std::fmt::Debug + Send + Sync {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        time_limit: Duration,
    ) -> Result<SandboxOutput, SandboxError>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub killed: bool,
    pub truncated: bool,
    pub duration: Duration,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        !self.killed && self.exit_code == Some(0)
    }

    pub fn describe_exit(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("Error: process exited with status {}", code),
            (None, Some(signal)) => format!("Error: process terminated by signal {}", signal),
            (None, None) => "Error: process terminated abnormally".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to spawn process: {msg}")]
    Spawn { msg: String },
    #[error("failed to wait for process: {msg}")]
    Wait { msg: String },
}
