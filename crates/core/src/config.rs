// Engine configuration, loaded once at process start

use crate::domain::{QueueSelector, RecurringTask};
use crate::error::{AppError, Result};
use crate::port::MaintenanceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: String,
    pub rpc: RpcConfig,
    pub workers: Vec<WorkerConfig>,
    pub dispatcher: DispatcherConfig,
    pub supervisor: SupervisorConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
    pub recurring: Vec<RecurringTaskConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://quarry.db".to_string(),
            rpc: RpcConfig::default(),
            workers: vec![WorkerConfig::default()],
            dispatcher: DispatcherConfig::default(),
            supervisor: SupervisorConfig::default(),
            retry: RetryConfig::default(),
            maintenance: MaintenanceConfig::default(),
            recurring: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9527,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queues: QueueSelector,
    /// Execution slots
    pub threads: usize,
    pub polling_interval_ms: u64,
    /// Jobs claimed per slot per poll
    pub batch_size: usize,
    pub heartbeat_interval_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: QueueSelector::all(),
            threads: 3,
            polling_interval_ms: 100,
            batch_size: 1,
            heartbeat_interval_ms: 10_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Errors tolerated inside one window before the slot stops
    pub threshold: u32,
    pub reset_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            reset_window_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub batch_size: usize,
    pub polling_interval_ms: u64,
    /// Heartbeat age after which a process counts as dead
    pub process_timeout_ms: i64,
    pub concurrency_maintenance_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            polling_interval_ms: 1_000,
            process_timeout_ms: 30_000,
            concurrency_maintenance_interval_ms: 60_000,
        }
    }
}

impl DispatcherConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub heartbeat_interval_ms: u64,
    pub monitor_interval_ms: u64,
    /// Child restarts allowed before the supervisor gives up
    pub max_restarts: u32,
    pub shutdown_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            monitor_interval_ms: 5_000,
            max_restarts: 3,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Backoff and attempt limit for one error class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryRule {
    /// Total executions allowed, including the first
    pub max_attempts: i32,
    pub base_delay_ms: i64,
    pub backoff_factor: f64,
    /// Fraction of the delay used as +/- jitter (0.0 - 1.0)
    pub jitter: f64,
    /// Upper bound on any single backoff delay
    pub max_delay_ms: i64,
}

impl Default for RetryRule {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            jitter: 0.1,
            max_delay_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default: RetryRule,
    /// Keyed by `error_class`
    pub rules: HashMap<String, RetryRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTaskConfig {
    pub key: String,
    pub schedule: String,
    pub class_name: String,
    #[serde(default = "default_queue")]
    pub queue_name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
}

fn default_queue() -> String {
    "default".to_string()
}

impl RecurringTaskConfig {
    pub fn to_task(&self) -> RecurringTask {
        let task = RecurringTask::new(&self.key, &self.schedule, &self.class_name)
            .with_queue(&self.queue_name)
            .with_priority(self.priority);
        match &self.arguments {
            Some(args) => task.with_arguments(args.clone()),
            None => task,
        }
    }
}

impl EngineConfig {
    /// Reject settings that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(AppError::Config("database_url is required".into()));
        }

        for (idx, worker) in self.workers.iter().enumerate() {
            if worker.threads == 0 {
                return Err(AppError::Config(format!("workers[{}].threads must be > 0", idx)));
            }
            if worker.batch_size == 0 {
                return Err(AppError::Config(format!(
                    "workers[{}].batch_size must be > 0",
                    idx
                )));
            }
            self.check_heartbeat(&format!("workers[{}]", idx), worker.heartbeat_interval_ms)?;
        }

        if self.dispatcher.batch_size == 0 {
            return Err(AppError::Config("dispatcher.batch_size must be > 0".into()));
        }
        if self.dispatcher.process_timeout_ms <= 0 {
            return Err(AppError::Config("dispatcher.process_timeout_ms must be > 0".into()));
        }
        self.check_heartbeat("supervisor", self.supervisor.heartbeat_interval_ms)?;

        for rule in std::iter::once(&self.retry.default).chain(self.retry.rules.values()) {
            if rule.max_attempts < 1 {
                return Err(AppError::Config("retry max_attempts must be >= 1".into()));
            }
            if !(0.0..=1.0).contains(&rule.jitter) {
                return Err(AppError::Config("retry jitter must be within 0.0..=1.0".into()));
            }
            if rule.base_delay_ms < 0 || rule.max_delay_ms < rule.base_delay_ms {
                return Err(AppError::Config(
                    "retry delays must satisfy 0 <= base_delay_ms <= max_delay_ms".into(),
                ));
            }
        }

        let mut keys = std::collections::HashSet::new();
        for task in &self.recurring {
            if !keys.insert(task.key.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate recurring task key '{}'",
                    task.key
                )));
            }
        }

        Ok(())
    }

    /// A process must get at least two heartbeats into one timeout window,
    /// otherwise a single late beat gets its claims reclaimed and re-run.
    fn check_heartbeat(&self, owner: &str, heartbeat_interval_ms: u64) -> Result<()> {
        if heartbeat_interval_ms == 0 {
            return Err(AppError::Config(format!("{}.heartbeat_interval_ms must be > 0", owner)));
        }
        let twice = (heartbeat_interval_ms as i64).saturating_mul(2);
        if twice > self.dispatcher.process_timeout_ms {
            return Err(AppError::Config(format!(
                "{}.heartbeat_interval_ms ({}) must be at most half of dispatcher.process_timeout_ms ({})",
                owner, heartbeat_interval_ms, self.dispatcher.process_timeout_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers[0].threads, 3);
        assert_eq!(config.dispatcher.batch_size, 500);
        assert_eq!(config.dispatcher.process_timeout_ms, 30_000);
        assert_eq!(config.workers[0].circuit_breaker.threshold, 100);
    }

    #[test]
    fn test_heartbeat_must_fit_twice_in_timeout() {
        let mut config = EngineConfig::default();
        config.workers[0].heartbeat_interval_ms = 20_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        config.workers[0].heartbeat_interval_ms = 15_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = EngineConfig::default();
        config.workers[0].threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_cap_below_base_delay_rejected() {
        let mut config = EngineConfig::default();
        config.retry.default.max_delay_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_recurring_keys_rejected() {
        let task = RecurringTaskConfig {
            key: "nightly".into(),
            schedule: "0 3 * * *".into(),
            class_name: "Cleanup".into(),
            queue_name: default_queue(),
            priority: 0,
            arguments: None,
        };
        let config = EngineConfig {
            recurring: vec![task.clone(), task],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "workers": [{ "queues": ["mailers", "report*"], "threads": 5 }],
            "retry": { "rules": { "Net::Timeout": { "max_attempts": 5 } } }
        }))
        .unwrap();

        assert_eq!(config.workers[0].threads, 5);
        assert_eq!(config.workers[0].batch_size, 1);
        assert!(config.workers[0].queues.matches("reports"));
        assert_eq!(config.retry.rules["Net::Timeout"].base_delay_ms, 1_000);
        assert_eq!(config.retry.rules["Net::Timeout"].max_delay_ms, 24 * 60 * 60 * 1000);
        assert!(config.validate().is_ok());
    }
}
