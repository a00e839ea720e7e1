use crate::core::domain::{ExecutionJob, ExecutionResult};

/// What a worker does with a claimed job. An `Err` means the attempt
/// produced no result at all and the queue should retry it.
#[mockall::automock]
#[async_trait::async_trait]
pub trait JobProcessor: std::fmt::Debug + Send + Sync {
    async fn process(&self, job: &ExecutionJob) -> Result<ExecutionResult, ProcessError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("workspace error: {msg}")]
    Workspace { msg: String },
}
