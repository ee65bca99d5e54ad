use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt as tracing_fmt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LogConfig {
    pub(crate) log_level: String,
    pub(crate) log_dir: Option<PathBuf>,
    pub(crate) otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>, otel_endpoint: Option<String>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
            otel_endpoint,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None, None)
    }
}

/// Diagnostics sink handed to every link session.
pub trait LoggerType: Send + Sync {
    fn log(&self, level: LogLevel, context: &str, msg: &str);
    fn clone_box(&self) -> Box<dyn LoggerType>;
    fn debug_box(&self) -> String;
}

pub struct Logger(pub Box<dyn LoggerType>);

impl Logger {
    pub fn tracing() -> Self {
        Logger(Box::new(TracingLogger))
    }

    pub fn into_inner(self) -> Box<dyn LoggerType> {
        self.0
    }

    pub fn debug(&self, context: &str, msg: &str) {
        self.0.log(LogLevel::Debug, context, msg);
    }

    pub fn info(&self, context: &str, msg: &str) {
        self.0.log(LogLevel::Info, context, msg);
    }

    pub fn warn(&self, context: &str, msg: &str) {
        self.0.log(LogLevel::Warn, context, msg);
    }

    pub fn error(&self, context: &str, msg: &str) {
        self.0.log(LogLevel::Error, context, msg);
    }
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Logger(self.0.clone_box())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Forwards everything to `tracing`.
#[derive(Clone, Debug, Default)]
pub struct TracingLogger;

impl LoggerType for TracingLogger {
    fn log(&self, level: LogLevel, context: &str, msg: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(%context, "{msg}"),
            LogLevel::Debug => tracing::debug!(%context, "{msg}"),
            LogLevel::Info => tracing::info!(%context, "{msg}"),
            LogLevel::Warn => tracing::warn!(%context, "{msg}"),
            LogLevel::Error => tracing::error!(%context, "{msg}"),
            LogLevel::Critical => tracing::error!(%context, "[CRITICAL] {msg}"),
        }
    }

    fn clone_box(&self) -> Box<dyn LoggerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "TracingLogger".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub context: String,
    pub msg: String,
}

/// Keeps entries in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries().iter().filter(|e| e.level == level).count()
    }
}

impl LoggerType for MemoryLogger {
    fn log(&self, level: LogLevel, context: &str, msg: &str) {
        let entry = LogEntry {
            level,
            context: context.to_string(),
            msg: msg.to_string(),
        };
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    fn clone_box(&self) -> Box<dyn LoggerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MemoryLogger({} entries)", self.entries().len())
    }
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| {
            Resource::builder()
                .with_service_name("dslink-broker")
                .with_attribute(KeyValue::new("service.component", "broker-core"))
                .build()
        })
        .clone()
}

fn init_logs(end_point: &str) -> anyhow::Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

/// Keeps the OTLP provider alive; flush it with [`Telemetry::shutdown`].
pub struct Telemetry {
    logger_provider: Option<SdkLoggerProvider>,
}

impl Telemetry {
    pub fn shutdown(self) {
        if let Some(provider) = self.logger_provider {
            if let Err(err) = provider.shutdown() {
                eprintln!("failed to flush OTLP logs: {err}");
            }
        }
    }
}

/// Install the process-wide subscriber.
///
/// - without `log_dir`, human-readable logs go to stderr (stdout may carry link traffic);
/// - with `log_dir`, logs roll daily into `<log_dir>/dsbroker.log`;
/// - with `otel_endpoint`, events are also exported over OTLP/HTTP.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<(Logger, Telemetry)> {
    let env_filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, stderr_layer) = match &config.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "dsbroker.log");
            (
                Some(tracing_fmt::layer().with_writer(appender).with_ansi(false)),
                None,
            )
        }
        None => (None, Some(tracing_fmt::layer().with_writer(std::io::stderr))),
    };

    let logger_provider = config.otel_endpoint.as_deref().map(init_logs).transpose()?;
    let otel_layer = match &logger_provider {
        Some(provider) => {
            let filter = EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| EnvFilter::new("info"))
                .add_directive("hyper=off".parse()?)
                .add_directive("tonic=off".parse()?)
                .add_directive("h2=off".parse()?)
                .add_directive("reqwest=off".parse()?);
            Some(OpenTelemetryTracingBridge::new(provider).with_filter(filter))
        }
        None => None,
    };

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .with(otel_layer)
        .try_init()?;

    Ok((Logger::tracing(), Telemetry { logger_provider }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_clones_share_entries() {
        let memory = MemoryLogger::new();
        let logger = Logger(Box::new(memory.clone()));
        let copy = logger.clone();
        logger.warn("generic", "stale rid 4");
        copy.info("link", "connected");
        assert_eq!(memory.entries().len(), 2);
        assert_eq!(memory.count(LogLevel::Warn), 1);
        assert_eq!(memory.entries()[0].context, "generic");
    }

    #[test]
    fn debug_output_names_the_sink() {
        let logger = Logger::tracing();
        assert_eq!(format!("{logger:?}"), "TracingLogger");
    }
}
