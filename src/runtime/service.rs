//! The uniform supervised wrapper around user-supplied sinks and probes.

use std::time::Duration;

use async_trait::async_trait;
use kameo::error::Infallible;
use kameo::prelude::*;
use kameo_actors::pubsub::Publish;

use crate::error::TargetError;
use crate::logger::DynLogger;
use crate::message::{LogLevel, Message as LogMessage};
use crate::runtime::engine::MessageSink;
use crate::runtime::{MonitorRef, ServiceEvent, ServiceKind, ServiceState};
use crate::target::{HealthCheck, HealthStatus, Target};
use crate::util::new_id;

/// What the service actually runs: a message sink, or a periodic probe that
/// re-arms itself after every run.
pub enum ServiceImpl {
    Sink(Box<dyn Target>),
    Probe {
        check: Box<dyn HealthCheck>,
        interval: Duration,
    },
}

/// Route one message into the wrapped sink.
pub struct Deliver(pub LogMessage);

/// Ask the wrapped sink to persist anything buffered. Replies `true` on ack.
pub struct FlushService;

pub struct Pause;
pub struct Resume;
pub struct GetState;
pub struct GetHealth;

/// Graceful stop: the wrapped sink gets its shutdown call first.
pub struct StopService;

/// Internal probe trigger.
struct Tick;

/// A supervised long-running service. State transitions:
/// `Starting -> Running`, `Running <-> Paused`, any -> `Faulted` on error,
/// and `Stopped` via [`StopService`] (terminal).
pub struct ServiceActor {
    id: u64,
    name: String,
    kind: ServiceKind,
    state: ServiceState,
    /// Taken while work runs on a spawned task; `None` after a panic lost it.
    inner: Option<ServiceImpl>,
    /// Deliveries held back while paused, drained on resume.
    held: Vec<LogMessage>,
    last_health: Option<HealthStatus>,
    monitor: MonitorRef,
    /// Scoped internal logger, e.g. `Lantern.Target(console)`.
    internal: DynLogger,
}

impl ServiceActor {
    pub fn sink(
        name: impl Into<String>,
        kind: ServiceKind,
        target: Box<dyn Target>,
        monitor: MonitorRef,
        internal: DynLogger,
    ) -> Self {
        ServiceActor {
            id: new_id(),
            name: name.into(),
            kind,
            state: ServiceState::Starting,
            inner: Some(ServiceImpl::Sink(target)),
            held: Vec::new(),
            last_health: None,
            monitor,
            internal,
        }
    }

    pub fn probe(
        name: impl Into<String>,
        check: Box<dyn HealthCheck>,
        interval: Duration,
        monitor: MonitorRef,
        internal: DynLogger,
    ) -> Self {
        ServiceActor {
            id: new_id(),
            name: name.into(),
            kind: ServiceKind::HealthCheck,
            state: ServiceState::Starting,
            inner: Some(ServiceImpl::Probe { check, interval }),
            held: Vec::new(),
            last_health: None,
            monitor,
            internal,
        }
    }

    async fn fault(&mut self, reason: String) {
        let line = format!("service faulted: {}", reason);
        let _ = self
            .internal
            .log(LogLevel::Error, &move |lvl| LogMessage::event(lvl, line.clone()))
            .await;
        self.state = ServiceState::Faulted(reason.clone());
        let event = ServiceEvent::Faulted {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            reason,
        };
        if let Err(e) = self.monitor.tell(Publish(event)).await {
            tracing::debug!(service = %self.name, error = %e, "monitor channel gone");
        }
    }

    /// Run the sink on its own task so a panic surfaces as a JoinError and
    /// faults the service instead of killing the actor.
    async fn consume(&mut self, msg: LogMessage) {
        let Some(ServiceImpl::Sink(mut sink)) = self.inner.take() else {
            return;
        };
        let fut = tokio::spawn(async move {
            let result = sink.consume(msg).await;
            (sink, result)
        });
        match fut.await {
            Ok((sink, result)) => {
                self.inner = Some(ServiceImpl::Sink(sink));
                if let Err(e) = result {
                    self.fault(e.to_string()).await;
                }
            }
            Err(e) => {
                // The sink is gone with the panicked task; only a restart
                // from the configured factory brings this service back.
                self.fault(format!("sink panicked: {}", e)).await;
            }
        }
    }

    fn schedule_tick(&self, actor_ref: ActorRef<Self>, interval: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = actor_ref.tell(Tick).await;
        });
    }
}

impl Actor for ServiceActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(mut args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        args.state = ServiceState::Running;
        if let Some(ServiceImpl::Probe { .. }) = &args.inner {
            // First probe runs immediately; each run re-arms the next.
            let _ = actor_ref.tell(Tick).await;
        }
        tracing::debug!(service = %args.name, kind = %args.kind.as_str(), "service running");
        Ok(args)
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        let event = ServiceEvent::Stopped {
            id: self.id,
            name: self.name.clone(),
        };
        let _ = self.monitor.tell(Publish(event)).await;
        Ok(())
    }
}

impl Message<Deliver> for ServiceActor {
    type Reply = ();
    async fn handle(
        &mut self,
        Deliver(msg): Deliver,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match self.state {
            ServiceState::Running => self.consume(msg).await,
            ServiceState::Paused => self.held.push(msg),
            // Faulted, Starting and Stopped services drop deliveries.
            _ => {}
        }
    }
}

impl Message<FlushService> for ServiceActor {
    type Reply = bool;
    async fn handle(
        &mut self,
        _msg: FlushService,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state != ServiceState::Running && self.state != ServiceState::Paused {
            return false;
        }
        match &mut self.inner {
            Some(ServiceImpl::Sink(sink)) => match sink.flush().await {
                Ok(()) => true,
                Err(e) => {
                    self.fault(e.to_string()).await;
                    false
                }
            },
            // Probes hold nothing to flush.
            Some(ServiceImpl::Probe { .. }) => true,
            None => false,
        }
    }
}

impl Message<Pause> for ServiceActor {
    type Reply = ();
    async fn handle(&mut self, _msg: Pause, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.state == ServiceState::Running {
            self.state = ServiceState::Paused;
        }
    }
}

impl Message<Resume> for ServiceActor {
    type Reply = ();
    async fn handle(&mut self, _msg: Resume, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.state != ServiceState::Paused {
            return;
        }
        self.state = ServiceState::Running;
        for msg in std::mem::take(&mut self.held) {
            if self.state != ServiceState::Running {
                // Faulted mid-drain; remaining messages are lost with it.
                break;
            }
            self.consume(msg).await;
        }
    }
}

impl Message<GetState> for ServiceActor {
    type Reply = ServiceState;
    async fn handle(
        &mut self,
        _msg: GetState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state.clone()
    }
}

impl Message<GetHealth> for ServiceActor {
    type Reply = Option<HealthStatus>;
    async fn handle(
        &mut self,
        _msg: GetHealth,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.last_health.clone()
    }
}

impl Message<StopService> for ServiceActor {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: StopService,
        ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state == ServiceState::Stopped {
            return;
        }
        if let Some(ServiceImpl::Sink(sink)) = &mut self.inner {
            if let Err(e) = sink.shutdown().await {
                tracing::warn!(service = %self.name, error = %e, "sink shutdown failed");
            }
        }
        self.state = ServiceState::Stopped;
        ctx.actor_ref().kill();
    }
}

impl Message<Tick> for ServiceActor {
    type Reply = ();
    async fn handle(&mut self, _msg: Tick, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let interval = match &self.inner {
            Some(ServiceImpl::Probe { interval, .. }) => *interval,
            _ => return,
        };
        if self.state == ServiceState::Running {
            let Some(ServiceImpl::Probe { mut check, interval }) = self.inner.take() else {
                return;
            };
            let fut = tokio::spawn(async move {
                let result = check.check().await;
                (check, result)
            });
            match fut.await {
                Ok((check, result)) => {
                    self.inner = Some(ServiceImpl::Probe { check, interval });
                    match result {
                        Ok(status) => {
                            if let HealthStatus::Unhealthy(reason) = &status {
                                tracing::warn!(service = %self.name, reason = %reason, "health check unhealthy");
                            }
                            self.last_health = Some(status);
                        }
                        Err(e) => self.fault(e.to_string()).await,
                    }
                }
                Err(e) => self.fault(format!("probe panicked: {}", e)).await,
            }
        }
        if matches!(self.state, ServiceState::Running | ServiceState::Paused) {
            self.schedule_tick(ctx.actor_ref().clone(), interval);
        }
    }
}

/// Adapter handing a service's mailbox to the engine as a subscriber sink.
pub struct ServiceSink {
    actor: ActorRef<ServiceActor>,
}

impl ServiceSink {
    pub fn new(actor: ActorRef<ServiceActor>) -> Self {
        ServiceSink { actor }
    }
}

#[async_trait]
impl MessageSink for ServiceSink {
    async fn deliver(&self, msg: LogMessage) -> Result<(), TargetError> {
        self.actor
            .tell(Deliver(msg))
            .await
            .map_err(|_| TargetError::other("service mailbox closed"))
    }
}
