//! Traits implemented by sink and probe authors.
//!
//! Implementations run inside a supervised service actor: errors returned
//! here fault the service, they never reach the caller of `log`.

use async_trait::async_trait;

use crate::error::TargetError;
use crate::message::Message;

/// A named message sink. Targets own their outputs and are expected to drain
/// and close them when `shutdown` is invoked.
#[async_trait]
pub trait Target: Send + Sync {
    /// Consume one routed message.
    async fn consume(&mut self, msg: Message) -> Result<(), TargetError>;

    /// Persist anything buffered. Invoked by registry flush; the default does
    /// nothing.
    async fn flush(&mut self) -> Result<(), TargetError> {
        Ok(())
    }

    /// Last call before the wrapping service stops.
    async fn shutdown(&mut self) -> Result<(), TargetError> {
        Ok(())
    }
}

/// Outcome of one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

/// A periodic probe, supervised like any other service.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&mut self) -> Result<HealthStatus, TargetError>;
}
