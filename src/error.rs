use thiserror::Error;

/// Errors raised while validating a [`Conf`](crate::config::Conf) before the
/// registry is spawned. These are fatal: a registry is never created from an
/// invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate service name `{0}`")]
    DuplicateName(String),
    #[error("service name must not be empty")]
    EmptyName,
    #[error("runtime identity (service/host) must not be empty")]
    EmptyIdentity,
    #[error("failed to construct service `{name}`: {reason}")]
    Factory { name: String, reason: String },
}

/// Errors surfaced to callers of [`Logger::log`](crate::logger::Logger::log)
/// and `log_with_ack`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// The ingress is bounded and saturated. Callers treat this as a drop
    /// signal; the message was not enqueued.
    #[error("log ingress buffer is full")]
    BufferFull,
    /// The pipeline has shut down; nothing will accept this message.
    #[error("logging pipeline is stopped")]
    Stopped,
}

/// Errors surfaced by registry control operations (logger lookup, flush,
/// shutdown).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry actor is past shutdown; control channels are closed.
    #[error("registry is stopped")]
    Stopped,
}

/// Errors returned by user-supplied sinks. A sink error faults the service
/// that wraps it; it never propagates to the caller of `log`.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl TargetError {
    pub fn other(reason: impl Into<String>) -> Self {
        TargetError::Other(reason.into())
    }
}
