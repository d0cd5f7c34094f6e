// Job Handler Port
// Application code registers one handler per class_name; the worker calls it
// with the decoded arguments of each claimed job.

use crate::domain::{ExecutionFailure, JobId};
use async_trait::async_trait;
use thiserror::Error;

/// What a handler knows about the job it is running
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue_name: String,
    pub class_name: String,
    /// 1 on the first claim
    pub attempts: i32,
    pub active_job_id: Option<String>,
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The job body returned an error
    #[error("{class}: {message}")]
    Failed {
        class: String,
        message: String,
        trace: Vec<String>,
    },

    #[error("No handler registered for class '{0}'")]
    UnknownHandler(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn failed(class: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Failed {
            class: class.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Capture an error and its `source()` chain as the trace
    pub fn from_error<E>(class: impl Into<String>, err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        ExecutionError::Failed {
            class: class.into(),
            message: err.to_string(),
            trace,
        }
    }

    /// Class name recorded on the Failed marker and matched by retry rules
    pub fn error_class(&self) -> &str {
        match self {
            ExecutionError::Failed { class, .. } => class,
            ExecutionError::UnknownHandler(_) => "UnknownHandlerError",
            ExecutionError::InvalidArguments(_) => "ArgumentError",
            ExecutionError::Panicked(_) => "PanicError",
        }
    }

    pub fn to_failure(&self) -> ExecutionFailure {
        let message = match self {
            ExecutionError::Failed { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let trace = match self {
            ExecutionError::Failed { trace, .. } => trace.clone(),
            _ => Vec::new(),
        };
        ExecutionFailure::new(self.error_class(), message).with_backtrace(trace)
    }
}

/// Job handler
///
/// Handlers must be safe to re-run: a job whose worker crashes is
/// reclaimed and executed again.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(
        &self,
        ctx: &JobContext,
        arguments: serde_json::Value,
    ) -> Result<(), ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// One scripted outcome
    #[derive(Debug, Clone)]
    pub enum Outcome {
        Succeed,
        Fail(ExecutionError),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
    }

    /// Handler that plays back a script, then repeats its fallback outcome
    #[derive(Clone)]
    pub struct ScriptedHandler {
        script: Arc<Mutex<VecDeque<Outcome>>>,
        fallback: Outcome,
        calls: Arc<Mutex<Vec<(JobId, serde_json::Value)>>>,
    }

    impl ScriptedHandler {
        pub fn new(fallback: Outcome) -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(Outcome::Succeed)
        }

        pub fn failing(class: &str, message: &str) -> Self {
            Self::new(Outcome::Fail(ExecutionError::failed(class, message)))
        }

        pub fn then(self, outcome: Outcome) -> Self {
            self.script.lock().unwrap().push_back(outcome);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<(JobId, serde_json::Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn perform(
            &self,
            ctx: &JobContext,
            arguments: serde_json::Value,
        ) -> Result<(), ExecutionError> {
            self.calls.lock().unwrap().push((ctx.job_id, arguments));

            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            match outcome {
                Outcome::Succeed => Ok(()),
                Outcome::Fail(err) => Err(err),
                Outcome::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                Outcome::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(())
                }
            }
        }
    }
}
