//! Handlers shipped with the engine binary
//!
//! Applications embedding quarry-core register their own; these exist so a
//! bare `quarry-engine` can be exercised from the CLI.

use async_trait::async_trait;
use quarry_core::application::{HandlerRegistry, Perform};
use quarry_core::port::{ExecutionError, JobContext};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_perform("quarry.noop", NoopJob);
    registry.register_perform("quarry.sleep", SleepJob);
    registry.register_perform("quarry.fail", FailJob);
    registry
}

/// Logs its arguments and succeeds
pub struct NoopJob;

#[async_trait]
impl Perform for NoopJob {
    type Args = serde_json::Value;

    async fn perform(&self, ctx: &JobContext, args: Self::Args) -> Result<(), ExecutionError> {
        info!(job_id = %ctx.job_id, queue = %ctx.queue_name, arguments = %args, "noop job ran");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SleepArgs {
    pub ms: u64,
}

/// Sleeps for `ms` milliseconds
pub struct SleepJob;

#[async_trait]
impl Perform for SleepJob {
    type Args = SleepArgs;

    async fn perform(&self, _ctx: &JobContext, args: Self::Args) -> Result<(), ExecutionError> {
        tokio::time::sleep(Duration::from_millis(args.ms)).await;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FailArgs {
    #[serde(default)]
    pub error_class: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Always fails; drives the retry path
pub struct FailJob;

#[async_trait]
impl Perform for FailJob {
    type Args = FailArgs;

    async fn perform(&self, _ctx: &JobContext, args: Self::Args) -> Result<(), ExecutionError> {
        Err(ExecutionError::failed(
            args.error_class.unwrap_or_else(|| "IntentionalFailure".to_string()),
            args.message.unwrap_or_else(|| "quarry.fail always fails".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::domain::{Job, JobArguments};
    use serde_json::json;

    fn job(class_name: &str, arguments: serde_json::Value) -> Job {
        Job {
            id: 1,
            queue_name: "default".into(),
            class_name: class_name.into(),
            arguments: JobArguments::new(arguments),
            priority: 0,
            active_job_id: None,
            concurrency: None,
            attempts: 1,
            scheduled_at: None,
            finished_at: None,
            failed_at: None,
            created_at: 0,
        }
    }

    async fn run(registry: &HandlerRegistry, job: &Job) -> Result<(), ExecutionError> {
        let invocation = registry.resolve(job)?;
        invocation
            .handler
            .perform(&invocation.context, invocation.arguments)
            .await
    }

    #[tokio::test]
    async fn test_builtin_handlers() {
        let registry = builtin_registry();
        assert_eq!(
            registry.class_names(),
            ["quarry.fail", "quarry.noop", "quarry.sleep"]
        );

        run(&registry, &job("quarry.noop", json!([1, 2]))).await.unwrap();
        run(&registry, &job("quarry.sleep", json!({"ms": 1}))).await.unwrap();

        let err = run(&registry, &job("quarry.fail", json!({"error_class": "Boom"})))
            .await
            .unwrap_err();
        assert_eq!(err.error_class(), "Boom");
    }

    #[tokio::test]
    async fn test_sleep_rejects_bad_arguments() {
        let registry = builtin_registry();
        let err = run(&registry, &job("quarry.sleep", json!({"seconds": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidArguments(_)));
    }
}
