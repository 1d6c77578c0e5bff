//! The synchronous facade applications hold onto.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kameo::actor::ActorRef;
use kameo::Actor;
use tokio::sync::RwLock;

use crate::config::{Conf, RuntimeInfo, TargetFactory};
use crate::error::{ConfigError, LogError, RegistryError};
use crate::logger::{DynLogger, Logger, MessageFactory, Middleware, TraceLogger};
use crate::message::{LogLevel, Message, PointName};
use crate::runtime::globals::LoggerFactory;
use crate::runtime::registry::{
    FlushPending, GetLogger, RegistryActor, RegistryArgs, ShutdownPipeline,
};
use crate::runtime::{FlushInfo, ShutdownInfo};
use crate::span::{Span, SpanIdGenerator};

/// Messages a [`PromisedLogger`] holds while its backing logger resolves.
/// Past this many, the newest are dropped.
const PROMISED_BUFFER: usize = 512;

/// A thin, clone-able view over the registry.
#[derive(Clone)]
pub struct LogManager {
    registry: ActorRef<RegistryActor>,
    runtime: RuntimeInfo,
    span_ids: Arc<SpanIdGenerator>,
}

impl LogManager {
    /// Validate the configuration, build every configured service, and spawn
    /// the registry around them.
    pub async fn create(conf: Conf) -> Result<LogManager, ConfigError> {
        let runtime = RuntimeInfo {
            service: conf.service.clone(),
            host: conf.host.clone(),
            clock: conf.clock.clone(),
            logger: conf.internal_logger.clone().unwrap_or_else(|| {
                Arc::new(TraceLogger::new(PointName::from(["Lantern", "Registry"])))
            }),
        };
        let span_ids = Arc::new(SpanIdGenerator::from_runtime(&runtime));

        let build = |name: &str, factory: &TargetFactory| {
            factory(&runtime).map_err(|e| ConfigError::Factory {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };

        let mut targets = Vec::new();
        for tc in &conf.targets {
            targets.push((tc.name.clone(), tc.factory.clone(), build(&tc.name, &tc.factory)?));
        }
        let mut metrics = Vec::new();
        for mc in &conf.metrics {
            metrics.push((mc.name.clone(), mc.factory.clone(), build(&mc.name, &mc.factory)?));
        }
        let mut health_checks = Vec::new();
        for hc in &conf.health_checks {
            let check = (hc.factory)(&runtime).map_err(|e| ConfigError::Factory {
                name: hc.name.clone(),
                reason: e.to_string(),
            })?;
            health_checks.push((hc.clone(), check));
        }

        let registry = RegistryActor::spawn(RegistryArgs {
            conf,
            runtime: runtime.clone(),
            span_ids: span_ids.clone(),
            targets,
            metrics,
            health_checks,
        });

        Ok(LogManager {
            registry,
            runtime,
            span_ids,
        })
    }

    pub(crate) fn from_parts(
        registry: ActorRef<RegistryActor>,
        runtime: RuntimeInfo,
        span_ids: Arc<SpanIdGenerator>,
    ) -> Self {
        LogManager {
            registry,
            runtime,
            span_ids,
        }
    }

    pub fn runtime_info(&self) -> &RuntimeInfo {
        &self.runtime
    }

    pub fn span_ids(&self) -> Arc<SpanIdGenerator> {
        self.span_ids.clone()
    }

    pub async fn get_logger(&self, name: impl Into<PointName>) -> Result<DynLogger, RegistryError> {
        self.get_logger_with(name, None).await
    }

    pub async fn get_logger_with_middleware(
        &self,
        name: impl Into<PointName>,
        middleware: Middleware,
    ) -> Result<DynLogger, RegistryError> {
        self.get_logger_with(name, Some(middleware)).await
    }

    async fn get_logger_with(
        &self,
        name: impl Into<PointName>,
        middleware: Option<Middleware>,
    ) -> Result<DynLogger, RegistryError> {
        self.registry
            .ask(GetLogger {
                name: name.into(),
                middleware,
            })
            .await
            .map(|reply| reply.0)
            .map_err(|_| RegistryError::Stopped)
    }

    /// Immediately usable logger backed by a pending lookup: calls are held
    /// in a bounded buffer (capacity 512, newest dropped on overflow) and
    /// replayed once the real logger resolves.
    pub fn get_logger_sync(&self, name: impl Into<PointName>) -> DynLogger {
        self.get_logger_sync_with(name, None)
    }

    fn get_logger_sync_with(
        &self,
        name: impl Into<PointName>,
        middleware: Option<Middleware>,
    ) -> DynLogger {
        let name = name.into();
        let promised = Arc::new(PromisedLogger::new(name.clone()));
        let manager = self.clone();
        let backing = promised.clone();
        tokio::spawn(async move {
            let resolved = manager.get_logger_with(name, middleware).await;
            backing.resolve(resolved).await;
        });
        promised
    }

    /// Start a root span logging through `logger`.
    pub fn span(&self, logger: DynLogger) -> Span {
        Span::build(logger, self.span_ids.clone(), self.runtime.clock.clone(), None)
    }

    /// Temporarily re-install the configuration that was active before this
    /// pipeline took over the process-wide cell.
    pub async fn pause_globals(&self) -> Result<(), RegistryError> {
        self.registry
            .ask(crate::runtime::globals::PauseGlobals)
            .await
            .map_err(|_| RegistryError::Stopped)
    }

    /// Re-install this pipeline's configuration after [`pause_globals`].
    ///
    /// [`pause_globals`]: LogManager::pause_globals
    pub async fn resume_globals(&self) -> Result<(), RegistryError> {
        self.registry
            .ask(crate::runtime::globals::ResumeGlobals)
            .await
            .map_err(|_| RegistryError::Stopped)
    }

    pub async fn flush_pending(
        &self,
        timeout: Option<Duration>,
    ) -> Result<FlushInfo, RegistryError> {
        self.registry
            .ask(FlushPending { timeout })
            .await
            .map_err(|_| RegistryError::Stopped)
    }

    /// Flush, then tear everything down in reverse dependency order.
    pub async fn shutdown(
        &self,
        flush_timeout: Option<Duration>,
        shutdown_timeout: Option<Duration>,
    ) -> Result<(FlushInfo, ShutdownInfo), RegistryError> {
        let result = self
            .registry
            .ask(ShutdownPipeline {
                flush: true,
                flush_timeout,
                shutdown_timeout,
            })
            .await
            .map_err(|_| RegistryError::Stopped)?;
        Ok((result.flush.unwrap_or_default(), result.shutdown))
    }

    /// Tear down without flushing; in-flight messages are dropped.
    pub async fn shutdown_without_flush(
        &self,
        shutdown_timeout: Option<Duration>,
    ) -> Result<ShutdownInfo, RegistryError> {
        let result = self
            .registry
            .ask(ShutdownPipeline {
                flush: false,
                flush_timeout: None,
                shutdown_timeout,
            })
            .await
            .map_err(|_| RegistryError::Stopped)?;
        Ok(result.shutdown)
    }
}

impl LoggerFactory for LogManager {
    fn get_logger(&self, name: PointName) -> DynLogger {
        self.get_logger_sync(name)
    }

    fn get_logger_with_middleware(&self, name: PointName, middleware: Middleware) -> DynLogger {
        self.get_logger_sync_with(name, Some(middleware))
    }
}

enum PromisedState {
    /// Messages held until the lookup completes, paired with their levels.
    Pending(Vec<(LogLevel, Message)>),
    Ready(DynLogger),
    /// The registry went away before resolving; everything is dropped.
    Dead,
}

/// A logger proxy that queues until its backing logger exists.
///
/// While pending it admits every level (the real filter is unknown), builds
/// messages eagerly and holds them; the backing logger re-applies its level
/// filter during replay.
pub struct PromisedLogger {
    name: PointName,
    state: RwLock<PromisedState>,
}

impl PromisedLogger {
    fn new(name: PointName) -> Self {
        PromisedLogger {
            name,
            state: RwLock::new(PromisedState::Pending(Vec::new())),
        }
    }

    async fn resolve(&self, resolved: Result<DynLogger, RegistryError>) {
        let mut state = self.state.write().await;
        let held = match &mut *state {
            PromisedState::Pending(held) => std::mem::take(held),
            _ => return,
        };
        match resolved {
            Ok(logger) => {
                for (level, msg) in held {
                    let _ = logger.log(level, &move |_| msg.clone()).await;
                }
                *state = PromisedState::Ready(logger);
            }
            Err(_) => {
                tracing::debug!(logger = %self.name, "backing logger never resolved");
                *state = PromisedState::Dead;
            }
        }
    }

    async fn enqueue_or_delegate(
        &self,
        level: LogLevel,
        factory: MessageFactory<'_>,
        with_ack: bool,
    ) -> Result<(), LogError> {
        {
            let state = self.state.read().await;
            match &*state {
                PromisedState::Ready(logger) => {
                    return if with_ack {
                        logger.log_with_ack(level, factory).await
                    } else {
                        logger.log(level, factory).await
                    };
                }
                PromisedState::Dead => return Err(LogError::Stopped),
                PromisedState::Pending(_) => {}
            }
        }
        let mut state = self.state.write().await;
        match &mut *state {
            PromisedState::Pending(held) => {
                if held.len() < PROMISED_BUFFER {
                    held.push((level, factory(level)));
                } else {
                    tracing::debug!(logger = %self.name, "promised buffer full; dropping message");
                }
                Ok(())
            }
            PromisedState::Ready(logger) => {
                let logger = logger.clone();
                drop(state);
                if with_ack {
                    logger.log_with_ack(level, factory).await
                } else {
                    logger.log(level, factory).await
                }
            }
            PromisedState::Dead => Err(LogError::Stopped),
        }
    }
}

#[async_trait]
impl Logger for PromisedLogger {
    fn name(&self) -> &PointName {
        &self.name
    }

    fn level(&self) -> LogLevel {
        match self.state.try_read().as_deref() {
            Ok(PromisedState::Ready(logger)) => logger.level(),
            _ => LogLevel::Verbose,
        }
    }

    async fn log(&self, level: LogLevel, factory: MessageFactory<'_>) -> Result<(), LogError> {
        self.enqueue_or_delegate(level, factory, false).await
    }

    async fn log_with_ack(
        &self,
        level: LogLevel,
        factory: MessageFactory<'_>,
    ) -> Result<(), LogError> {
        self.enqueue_or_delegate(level, factory, true).await
    }
}
