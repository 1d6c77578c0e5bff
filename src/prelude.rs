//! Prelude module for convenient imports when wiring pipelines and building
//! targets.
//!
//! ```ignore
//! use lantern::prelude::*;
//! ```

// Re-export async_trait for the required attribute macro on Target impls
pub use async_trait::async_trait;

// Std types commonly needed
pub use std::collections::HashMap;
pub use std::sync::Arc;

// Message types
pub use crate::message::{LogLevel, Message, PointName};
pub use crate::value::Value;

// Capabilities
pub use crate::logger::{DynLogger, Logger, Middleware};
pub use crate::span::{Span, SpanIdGenerator};

// Configuration
pub use crate::config::{
    Clock, Conf, HealthCheckConf, MetricConf, RuntimeInfo, SystemClock, TargetConf,
};
pub use crate::processing::{Emit, Processing};

// Sink author traits
pub use crate::target::{HealthCheck, HealthStatus, Target};

// Errors
pub use crate::error::{ConfigError, LogError, RegistryError, TargetError};

// Facade
pub use crate::manager::LogManager;
pub use crate::runtime::{FlushInfo, ShutdownInfo};
