//! The composition root: owns the engine, every service and the globals
//! actor, and serves logger handles, flush and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use kameo::error::Infallible;
use kameo::prelude::*;
use kameo_actors::pubsub::{PubSub, Subscribe as MonitorSubscribe};

use crate::config::{Conf, HealthCheckConf, RuntimeInfo, TargetFactory};
use crate::logger::{compose, DynLogger, Middleware, TraceLogger};
use crate::manager::LogManager;
use crate::message::{LogLevel, Message as LogMessage, PointName};
use crate::runtime::engine::{Engine, EngineLogger, StopEngine, Subscribe};
use crate::runtime::globals::{GlobalsActor, PauseGlobals, ResumeGlobals, StopGlobals};
use crate::runtime::service::{FlushService, GetState, ServiceActor, ServiceSink, StopService};
use crate::runtime::{FlushInfo, MonitorRef, ServiceEvent, ServiceKind, ShutdownInfo};
use crate::span::SpanIdGenerator;
use crate::target::{HealthCheck, Target};

/// Faulted services are respawned this long after the fault is observed.
const RESTART_DELAY: Duration = Duration::from_millis(500);

/// How to rebuild a service when it faults.
enum ServiceRecipe {
    Sink {
        kind: ServiceKind,
        factory: TargetFactory,
    },
    Probe(HealthCheckConf),
}

struct ServiceHandle {
    actor: ActorRef<ServiceActor>,
    recipe: ServiceRecipe,
}

impl ServiceHandle {
    fn kind(&self) -> ServiceKind {
        match &self.recipe {
            ServiceRecipe::Sink { kind, .. } => *kind,
            ServiceRecipe::Probe(_) => ServiceKind::HealthCheck,
        }
    }
}

/// Everything pre-built by [`LogManager::create`]: service instances are
/// constructed up front so factory errors fail creation instead of an actor.
pub struct RegistryArgs {
    pub conf: Conf,
    pub runtime: RuntimeInfo,
    pub span_ids: Arc<SpanIdGenerator>,
    pub targets: Vec<(String, TargetFactory, Box<dyn Target>)>,
    pub metrics: Vec<(String, TargetFactory, Box<dyn Target>)>,
    pub health_checks: Vec<(HealthCheckConf, Box<dyn HealthCheck>)>,
}

/// Resolve a logger handle whose sends feed the engine.
pub struct GetLogger {
    pub name: PointName,
    pub middleware: Option<Middleware>,
}

/// Wraps [`DynLogger`] so it can serve as an actor [`kameo::Reply`]; `Arc<dyn
/// Logger>` itself can't implement the trait because its target is unsized.
#[derive(kameo::Reply)]
pub struct LoggerReply(pub DynLogger);

/// Broadcast a flush to every registered sink service.
pub struct FlushPending {
    pub timeout: Option<Duration>,
}

/// Ordered teardown. Optionally preceded by a flush.
pub struct ShutdownPipeline {
    pub flush: bool,
    pub flush_timeout: Option<Duration>,
    pub shutdown_timeout: Option<Duration>,
}

#[derive(Debug, Clone, kameo::Reply)]
pub struct ShutdownResult {
    pub flush: Option<FlushInfo>,
    pub shutdown: ShutdownInfo,
}

/// Internal: respawn a faulted service from its configured factory.
struct RestartService {
    name: String,
}

pub struct RegistryActor {
    conf: Conf,
    runtime: RuntimeInfo,
    engine: ActorRef<Engine>,
    services: HashMap<String, ServiceHandle>,
    monitor: MonitorRef,
    globals: ActorRef<GlobalsActor>,
    middleware: Middleware,
}

impl RegistryActor {
    /// Internal logger scoped to one service, e.g. `Lantern.Target(console)`.
    fn scoped_logger(kind: ServiceKind, name: &str) -> DynLogger {
        Arc::new(TraceLogger::new(PointName::new(vec![
            "Lantern".to_string(),
            format!("{}({})", kind.as_str(), name),
        ])))
    }

    async fn spawn_sink(
        engine: &ActorRef<Engine>,
        monitor: &MonitorRef,
        name: &str,
        kind: ServiceKind,
        target: Box<dyn Target>,
    ) -> ActorRef<ServiceActor> {
        tracing::debug!(service = %name, kind = %kind.as_str(), "spawning service");
        let actor = ServiceActor::spawn(ServiceActor::sink(
            name,
            kind,
            target,
            monitor.clone(),
            Self::scoped_logger(kind, name),
        ));
        let _ = engine
            .ask(Subscribe {
                key: name.to_string(),
                sink: Arc::new(ServiceSink::new(actor.clone())),
            })
            .await;
        actor
    }

    /// Flush every sink service, honoring the per-request deadline. Targets
    /// that have not replied by the deadline land in `timeouts`.
    async fn flush(&self, timeout: Option<Duration>) -> FlushInfo {
        let sinks: Vec<(String, ActorRef<ServiceActor>)> = self
            .services
            .iter()
            .filter(|(_, handle)| handle.kind() != ServiceKind::HealthCheck)
            .map(|(name, handle)| (name.clone(), handle.actor.clone()))
            .collect();

        let replies = join_all(sinks.into_iter().map(|(name, actor)| async move {
            let acked = match timeout {
                Some(t) => matches!(
                    tokio::time::timeout(t, actor.ask(FlushService)).await,
                    Ok(Ok(true))
                ),
                None => matches!(actor.ask(FlushService).await, Ok(true)),
            };
            (name, acked)
        }))
        .await;

        let mut info = FlushInfo::default();
        for (name, acked) in replies {
            if acked {
                info.acks.push(name);
            } else {
                info.timeouts.push(name);
            }
        }
        info.acks.sort();
        info.timeouts.sort();
        info
    }

    async fn stop_group(&mut self, kind: ServiceKind, timeout: Option<Duration>, info: &mut ShutdownInfo) {
        let group: Vec<String> = self
            .services
            .iter()
            .filter(|(_, handle)| handle.kind() == kind)
            .map(|(name, _)| name.clone())
            .collect();

        let mut stops = Vec::new();
        for name in group {
            if let Some(handle) = self.services.remove(&name) {
                stops.push((name, handle.actor));
            }
        }

        let replies = join_all(stops.into_iter().map(|(name, actor)| async move {
            let acked = match timeout {
                Some(t) => tokio::time::timeout(t, actor.ask(StopService)).await.is_ok(),
                None => {
                    let _ = actor.ask(StopService).await;
                    true
                }
            };
            (name, acked)
        }))
        .await;

        for (name, acked) in replies {
            if acked {
                info.acks.push(name);
            } else {
                info.timeouts.push(name);
            }
        }
    }

    async fn log_internal(&self, level: LogLevel, text: String) {
        let _ = self
            .runtime
            .logger
            .log(level, &move |lvl| LogMessage::event(lvl, text.clone()))
            .await;
    }
}

impl Actor for RegistryActor {
    type Args = RegistryArgs;
    type Error = Infallible;

    /// Bring the whole pipeline up: monitor channel, engine, one supervised
    /// actor per configured service (targets subscribed to the engine under
    /// their configured names), then the globals installation.
    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let monitor: MonitorRef = PubSub::spawn(PubSub::new());
        let _ = monitor.tell(MonitorSubscribe(actor_ref.clone())).await;

        let engine = Engine::spawn(Engine::new(args.conf.processing.clone()));

        let mut services = HashMap::new();
        for (name, factory, target) in args.targets {
            let actor =
                Self::spawn_sink(&engine, &monitor, &name, ServiceKind::Target, target).await;
            services.insert(
                name,
                ServiceHandle {
                    actor,
                    recipe: ServiceRecipe::Sink {
                        kind: ServiceKind::Target,
                        factory,
                    },
                },
            );
        }
        for (name, factory, target) in args.metrics {
            let actor =
                Self::spawn_sink(&engine, &monitor, &name, ServiceKind::Metric, target).await;
            services.insert(
                name,
                ServiceHandle {
                    actor,
                    recipe: ServiceRecipe::Sink {
                        kind: ServiceKind::Metric,
                        factory,
                    },
                },
            );
        }
        for (conf, check) in args.health_checks {
            tracing::debug!(service = %conf.name, kind = "HealthCheck", "spawning service");
            let actor = ServiceActor::spawn(ServiceActor::probe(
                &conf.name,
                check,
                conf.interval,
                monitor.clone(),
                Self::scoped_logger(ServiceKind::HealthCheck, &conf.name),
            ));
            services.insert(
                conf.name.clone(),
                ServiceHandle {
                    actor,
                    recipe: ServiceRecipe::Probe(conf),
                },
            );
        }

        let manager =
            LogManager::from_parts(actor_ref, args.runtime.clone(), args.span_ids.clone());
        let globals = GlobalsActor::spawn(GlobalsActor::new(Arc::new(manager)));

        let middleware = compose(&args.conf.middleware);
        Ok(RegistryActor {
            conf: args.conf,
            runtime: args.runtime,
            engine,
            services,
            monitor,
            globals,
            middleware,
        })
    }
}

impl Message<GetLogger> for RegistryActor {
    type Reply = LoggerReply;

    async fn handle(
        &mut self,
        msg: GetLogger,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let level = (self.conf.level_picker)(&msg.name);
        let middleware = match msg.middleware {
            Some(call_site) => {
                // Registry middleware wraps the call-site chain.
                let registry = self.middleware.clone();
                Arc::new(move |m| registry(call_site(m))) as Middleware
            }
            None => self.middleware.clone(),
        };
        LoggerReply(Arc::new(EngineLogger::new(
            msg.name,
            level,
            self.engine.clone(),
            middleware,
        )))
    }
}

impl Message<FlushPending> for RegistryActor {
    type Reply = FlushInfo;

    async fn handle(
        &mut self,
        msg: FlushPending,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.flush(msg.timeout).await
    }
}

impl Message<ShutdownPipeline> for RegistryActor {
    type Reply = ShutdownResult;

    /// Reverse dependency order: health checks, then metrics, then targets,
    /// then the engine and the globals installation. The registry actor
    /// stops once teardown completes; later control sends fail.
    async fn handle(
        &mut self,
        msg: ShutdownPipeline,
        ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let flush = if msg.flush {
            Some(self.flush(msg.flush_timeout).await)
        } else {
            None
        };

        let mut shutdown = ShutdownInfo::default();
        for kind in [
            ServiceKind::HealthCheck,
            ServiceKind::Metric,
            ServiceKind::Target,
        ] {
            self.stop_group(kind, msg.shutdown_timeout, &mut shutdown).await;
        }
        shutdown.acks.sort();
        shutdown.timeouts.sort();

        let _ = self.engine.ask(StopEngine).await;
        let _ = self.globals.ask(StopGlobals).await;
        self.monitor.kill();

        self.log_internal(LogLevel::Info, "registry stopped".to_string())
            .await;
        ctx.actor_ref().kill();
        ShutdownResult { flush, shutdown }
    }
}

impl Message<PauseGlobals> for RegistryActor {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: PauseGlobals,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let _ = self.globals.ask(PauseGlobals).await;
    }
}

impl Message<ResumeGlobals> for RegistryActor {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: ResumeGlobals,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let _ = self.globals.ask(ResumeGlobals).await;
    }
}

impl Message<ServiceEvent> for RegistryActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ServiceEvent,
        ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match msg {
            ServiceEvent::Faulted { name, reason, .. } => {
                self.log_internal(
                    LogLevel::Error,
                    format!("service {} faulted: {}", name, reason),
                )
                .await;
                let actor_ref = ctx.actor_ref().clone();
                tokio::spawn(async move {
                    tokio::time::sleep(RESTART_DELAY).await;
                    let _ = actor_ref.tell(RestartService { name }).await;
                });
            }
            ServiceEvent::Stopped { name, .. } => {
                tracing::debug!(service = %name, "service stopped");
            }
        }
    }
}

impl Message<RestartService> for RegistryActor {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: RestartService,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let Some(handle) = self.services.get(&msg.name) else {
            return;
        };
        // The handle may already point at a healthy replacement.
        match handle.actor.ask(GetState).await {
            Ok(state) if !matches!(state, crate::runtime::ServiceState::Faulted(_)) => return,
            _ => {}
        }

        let old = handle.actor.clone();
        let replacement = match &handle.recipe {
            ServiceRecipe::Sink { kind, factory } => match factory(&self.runtime) {
                Ok(target) => {
                    Self::spawn_sink(&self.engine, &self.monitor, &msg.name, *kind, target).await
                }
                Err(e) => {
                    self.log_internal(
                        LogLevel::Error,
                        format!("restart of {} failed: {}", msg.name, e),
                    )
                    .await;
                    return;
                }
            },
            ServiceRecipe::Probe(conf) => match (conf.factory)(&self.runtime) {
                Ok(check) => ServiceActor::spawn(ServiceActor::probe(
                    &conf.name,
                    check,
                    conf.interval,
                    self.monitor.clone(),
                    Self::scoped_logger(ServiceKind::HealthCheck, &conf.name),
                )),
                Err(e) => {
                    self.log_internal(
                        LogLevel::Error,
                        format!("restart of {} failed: {}", msg.name, e),
                    )
                    .await;
                    return;
                }
            },
        };

        let _ = old.tell(StopService).await;
        if let Some(handle) = self.services.get_mut(&msg.name) {
            handle.actor = replacement;
        }
        self.log_internal(LogLevel::Info, format!("service {} restarted", msg.name))
            .await;
    }
}
