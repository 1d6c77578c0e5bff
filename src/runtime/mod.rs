//! The long-running actors behind the public facade.
//!
//! Every component here is a kameo actor owning private state; services
//! report lifecycle transitions on a shared pub/sub monitor channel that the
//! registry subscribes to.

pub mod engine;
pub mod globals;
pub mod registry;
pub mod service;

use kameo_actors::pubsub::PubSub;

/// Observable lifecycle of a supervised service.
#[derive(Debug, Clone, PartialEq, Eq, kameo::Reply)]
pub enum ServiceState {
    Starting,
    Running,
    Paused,
    Faulted(String),
    Stopped,
}

/// What kind of sink a service wraps. Shutdown ordering and internal logger
/// names derive from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Target,
    Metric,
    HealthCheck,
}

impl ServiceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Target => "Target",
            ServiceKind::Metric => "Metric",
            ServiceKind::HealthCheck => "HealthCheck",
        }
    }
}

/// Lifecycle notifications published by services on the monitor channel.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Faulted {
        id: u64,
        name: String,
        kind: ServiceKind,
        reason: String,
    },
    Stopped {
        id: u64,
        name: String,
    },
}

/// The monitor channel all services publish lifecycle events to.
pub type MonitorRef = kameo::actor::ActorRef<PubSub<ServiceEvent>>;

/// Per-target outcome of a flush request.
#[derive(Debug, Clone, Default, PartialEq, Eq, kameo::Reply)]
pub struct FlushInfo {
    /// Names of targets that acknowledged within the deadline.
    pub acks: Vec<String>,
    /// Names of targets that had not replied when the deadline fired.
    pub timeouts: Vec<String>,
}

/// Per-service outcome of a shutdown request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownInfo {
    pub acks: Vec<String>,
    pub timeouts: Vec<String>,
}
