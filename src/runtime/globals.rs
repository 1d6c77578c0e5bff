//! Process-wide logger configuration with an explicit pause/resume/shutdown
//! lifecycle.
//!
//! The cell is single-writer (the globals actor) and many-reader; pausing
//! re-installs whatever was configured before this pipeline came up, which
//! lets a test harness temporarily take over logging and hand it back.

use std::sync::{Arc, RwLock};

use kameo::error::Infallible;
use kameo::prelude::*;
use once_cell::sync::Lazy;

use crate::logger::{DynLogger, Middleware, NullLogger};
use crate::message::PointName;

/// The capability set installed process-wide: resolve loggers by name.
pub trait LoggerFactory: Send + Sync {
    fn get_logger(&self, name: PointName) -> DynLogger;
    fn get_logger_with_middleware(&self, name: PointName, middleware: Middleware) -> DynLogger;
}

pub type DynLoggerFactory = Arc<dyn LoggerFactory>;

/// Installed before any pipeline is configured; resolves every name to a
/// logger that discards everything.
struct NullFactory;

impl LoggerFactory for NullFactory {
    fn get_logger(&self, _name: PointName) -> DynLogger {
        Arc::new(NullLogger::default())
    }

    fn get_logger_with_middleware(&self, name: PointName, _middleware: Middleware) -> DynLogger {
        self.get_logger(name)
    }
}

static GLOBAL: Lazy<RwLock<DynLoggerFactory>> =
    Lazy::new(|| RwLock::new(Arc::new(NullFactory)));

/// Swap the installed configuration, returning the previous one.
fn install(config: DynLoggerFactory) -> DynLoggerFactory {
    let mut cell = GLOBAL.write().unwrap();
    std::mem::replace(&mut *cell, config)
}

/// Resolve a logger from the currently installed process-wide configuration.
pub fn get_logger(name: impl Into<PointName>) -> DynLogger {
    GLOBAL.read().unwrap().get_logger(name.into())
}

pub fn get_logger_with_middleware(
    name: impl Into<PointName>,
    middleware: Middleware,
) -> DynLogger {
    GLOBAL
        .read()
        .unwrap()
        .get_logger_with_middleware(name.into(), middleware)
}

/// Re-install the prior configuration; the actor keeps running and can be
/// resumed.
pub struct PauseGlobals;
/// Re-install this actor's own configuration.
pub struct ResumeGlobals;
/// Re-install the prior configuration and stop. Terminal.
pub struct StopGlobals;

/// Owns one installation of the process-wide cell.
///
/// Supervision: terminate policy. This actor is never restarted; a fault
/// propagates to whoever spawned it.
pub struct GlobalsActor {
    current: DynLoggerFactory,
    previous: DynLoggerFactory,
}

impl GlobalsActor {
    /// Applies `config` to the process-wide cell immediately and remembers
    /// what it displaced.
    pub fn new(config: DynLoggerFactory) -> Self {
        let previous = install(config.clone());
        GlobalsActor {
            current: config,
            previous,
        }
    }
}

impl Actor for GlobalsActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(args: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }
}

impl Message<PauseGlobals> for GlobalsActor {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: PauseGlobals,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        install(self.previous.clone());
    }
}

impl Message<ResumeGlobals> for GlobalsActor {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: ResumeGlobals,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        install(self.current.clone());
    }
}

impl Message<StopGlobals> for GlobalsActor {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: StopGlobals,
        ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        install(self.previous.clone());
        ctx.actor_ref().kill();
    }
}
