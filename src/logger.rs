//! The client-facing send capability and message middleware.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LogError;
use crate::message::{LogLevel, Message, PointName};

/// Lazily builds a message for an admitted level. Implementations must not
/// invoke the factory for filtered-out levels.
pub type MessageFactory<'a> = &'a (dyn Fn(LogLevel) -> Message + Send + Sync);

/// A per-logger message transformer, composable by function composition.
pub type Middleware = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// A shareable logger handle.
pub type DynLogger = Arc<dyn Logger>;

/// The send interface handed to application code.
///
/// `log` enqueues without waiting for target acknowledgement; it fails with
/// [`LogError::BufferFull`] only when a bounded ingress is saturated.
/// `log_with_ack` resolves once the message has passed the processing
/// pipeline, not when targets have written it.
#[async_trait]
pub trait Logger: Send + Sync {
    fn name(&self) -> &PointName;

    /// The minimum level this logger admits.
    fn level(&self) -> LogLevel;

    async fn log(&self, level: LogLevel, factory: MessageFactory<'_>) -> Result<(), LogError>;

    async fn log_with_ack(
        &self,
        level: LogLevel,
        factory: MessageFactory<'_>,
    ) -> Result<(), LogError>;
}

/// Compose middleware into a single transformer. An empty slice composes to
/// the identity.
pub fn compose(middleware: &[Middleware]) -> Middleware {
    let chain: Vec<Middleware> = middleware.to_vec();
    Arc::new(move |mut msg| {
        for mw in &chain {
            msg = mw(msg);
        }
        msg
    })
}

/// Middleware constructors enriching messages with runtime identity.
pub mod middleware {
    use super::Middleware;
    use std::sync::Arc;

    pub fn set_host(host: impl Into<String>) -> Middleware {
        let host = host.into();
        Arc::new(move |msg| msg.set_context("host", host.as_str()))
    }

    pub fn set_service(service: impl Into<String>) -> Middleware {
        let service = service.into();
        Arc::new(move |msg| msg.set_context("service", service.as_str()))
    }
}

/// Discards everything. Installed as the global logger before any pipeline is
/// configured.
#[derive(Debug, Default)]
pub struct NullLogger {
    name: PointName,
}

#[async_trait]
impl Logger for NullLogger {
    fn name(&self) -> &PointName {
        &self.name
    }

    fn level(&self) -> LogLevel {
        LogLevel::Fatal
    }

    async fn log(&self, _level: LogLevel, _factory: MessageFactory<'_>) -> Result<(), LogError> {
        Ok(())
    }

    async fn log_with_ack(
        &self,
        _level: LogLevel,
        _factory: MessageFactory<'_>,
    ) -> Result<(), LogError> {
        Ok(())
    }
}

/// The library's own voice: forwards admitted messages to the `tracing`
/// ecosystem so internal diagnostics show up wherever the host application
/// sends its logs.
pub struct TraceLogger {
    name: PointName,
    level: LogLevel,
}

impl TraceLogger {
    pub fn new(name: PointName) -> Self {
        TraceLogger {
            name,
            level: LogLevel::Debug,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    fn forward(&self, msg: &Message) {
        let name = msg.name.to_string();
        let text = match &msg.value {
            crate::value::Value::String(s) => s.clone(),
            other => format!("{:?}", other),
        };
        match msg.level {
            LogLevel::Verbose => tracing::trace!(logger = %name, "{}", text),
            LogLevel::Debug => tracing::debug!(logger = %name, "{}", text),
            LogLevel::Info => tracing::info!(logger = %name, "{}", text),
            LogLevel::Warn => tracing::warn!(logger = %name, "{}", text),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(logger = %name, "{}", text),
        }
    }
}

#[async_trait]
impl Logger for TraceLogger {
    fn name(&self) -> &PointName {
        &self.name
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    async fn log(&self, level: LogLevel, factory: MessageFactory<'_>) -> Result<(), LogError> {
        if level < self.level {
            return Ok(());
        }
        let msg = factory(level).with_name(self.name.clone());
        self.forward(&msg);
        Ok(())
    }

    async fn log_with_ack(
        &self,
        level: LogLevel,
        factory: MessageFactory<'_>,
    ) -> Result<(), LogError> {
        self.log(level, factory).await
    }
}
