// Handler registry: class_name -> statically typed job handler

use crate::domain::Job;
use crate::port::{ExecutionError, JobContext, JobHandler};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed job body; wrap in [`Typed`] to register it
#[async_trait]
pub trait Perform: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    async fn perform(&self, ctx: &JobContext, args: Self::Args) -> Result<(), ExecutionError>;
}

/// Adapts a [`Perform`] into a [`JobHandler`] by decoding its arguments
pub struct Typed<P: Perform> {
    inner: P,
    _args: PhantomData<fn() -> P::Args>,
}

impl<P: Perform> Typed<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<P: Perform> JobHandler for Typed<P> {
    async fn perform(
        &self,
        ctx: &JobContext,
        arguments: serde_json::Value,
    ) -> Result<(), ExecutionError> {
        let args: P::Args = serde_json::from_value(arguments)
            .map_err(|e| ExecutionError::InvalidArguments(e.to_string()))?;
        self.inner.perform(ctx, args).await
    }
}

/// Arguments of a job enqueued through an external job framework
#[derive(Debug, Deserialize)]
struct Envelope {
    job_class: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// A job resolved to the handler that will run it
pub struct Invocation {
    pub handler: Arc<dyn JobHandler>,
    pub context: JobContext,
    pub arguments: serde_json::Value,
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(class_name.into(), handler);
    }

    pub fn register_perform<P: Perform>(&mut self, class_name: impl Into<String>, perform: P) {
        self.register(class_name, Arc::new(Typed::new(perform)));
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(class_name).cloned()
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pick the handler for a claimed job.
    ///
    /// Jobs carrying an `active_job_id` wrap their payload as
    /// `{"job_class": ..., "arguments": ...}` and run `job_class`; all other
    /// jobs run `class_name` with the stored arguments as-is.
    pub fn resolve(&self, job: &Job) -> Result<Invocation, ExecutionError> {
        let (class_name, arguments) = match &job.active_job_id {
            Some(_) => {
                let envelope: Envelope = serde_json::from_value(job.arguments.as_value().clone())
                    .map_err(|e| {
                        ExecutionError::InvalidArguments(format!("malformed job envelope: {}", e))
                    })?;
                (envelope.job_class, envelope.arguments)
            }
            None => (job.class_name.clone(), job.arguments.as_value().clone()),
        };

        let handler = self
            .get(&class_name)
            .ok_or_else(|| ExecutionError::UnknownHandler(class_name.clone()))?;

        Ok(Invocation {
            handler,
            context: JobContext {
                job_id: job.id,
                queue_name: job.queue_name.clone(),
                class_name,
                attempts: job.attempts,
                active_job_id: job.active_job_id.clone(),
            },
            arguments,
        })
    }
}
