//! Subscriber setup
//!
//! - `RUST_LOG`: filter directives (default `quarry=info`)
//! - `QUARRY_LOG_FORMAT`: `json` for structured output, anything else is pretty
//! - `QUARRY_LOG_DIR`: write a daily-rolling `quarry-engine.log` there instead of stdout

use crate::telemetry;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "quarry=info";
const LOG_FILE_PREFIX: &str = "quarry-engine.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process, dropping it
/// flushes buffered file output.
pub fn init() -> Result<Option<WorkerGuard>> {
    let format = LogFormat::parse(std::env::var("QUARRY_LOG_FORMAT").ok().as_deref());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let (writer, guard) = match std::env::var("QUARRY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        Err(_) => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let (otel_layer, otel_status) = telemetry::layer();
    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(guard.is_none()).with_writer(writer))
            .try_init()?,
    }

    otel_status.log();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }
}
