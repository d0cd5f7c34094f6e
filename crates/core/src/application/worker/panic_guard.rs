// Panic isolation for job execution
use std::any::Any;
use std::future::Future;
use tokio::task::JoinError;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked
    Panicked(String),
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run a future on its own task so a panic in it cannot unwind the caller.
///
/// A cancelled task (runtime shutting down) is reported as a panic too; the
/// job it carried did not complete.
pub async fn execute_guarded<F, T>(future: F) -> PanicGuardResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn(future).await {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) => {
            let panic_msg = describe_join_error(join_err);
            error!(panic_msg = %panic_msg, "Job task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

fn describe_join_error(join_err: JoinError) -> String {
    if join_err.is_panic() {
        panic_message(join_err.into_panic().as_ref())
    } else {
        "task cancelled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_is_contained() {
        let result = execute_guarded(async {
            panic!("gradebook exploded");
        })
        .await;

        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "gradebook exploded"),
            PanicGuardResult::Success(()) => panic!("expected panic"),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let id = 7;
        let result: PanicGuardResult<()> = execute_guarded(async move {
            panic!("job {} failed", id);
        })
        .await;

        assert!(matches!(result, PanicGuardResult::Panicked(msg) if msg == "job 7 failed"));
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let result = execute_guarded(async { 42 }).await;
        assert!(matches!(result, PanicGuardResult::Success(42)));
    }
}
