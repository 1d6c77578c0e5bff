//! Pipeline configuration and the runtime identity handed to services.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{ConfigError, TargetError};
use crate::logger::{DynLogger, Middleware, TraceLogger};
use crate::message::{LogLevel, PointName};
use crate::processing::Processing;
use crate::target::{HealthCheck, Target};

/// Injectable time source. Spans and flush deadlines read the clock through
/// this seam so tests can pin it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type DynClock = Arc<dyn Clock>;

/// Identity and ambient capabilities of a running pipeline. Immutable after
/// registry creation. `logger` is the internal logger the library uses to log
/// about itself.
#[derive(Clone)]
pub struct RuntimeInfo {
    pub service: String,
    pub host: String,
    pub clock: DynClock,
    pub logger: DynLogger,
}

impl RuntimeInfo {
    pub fn new(service: impl Into<String>, host: impl Into<String>) -> Self {
        RuntimeInfo {
            service: service.into(),
            host: host.into(),
            clock: Arc::new(SystemClock),
            logger: Arc::new(TraceLogger::new(PointName::from(["Lantern"]))),
        }
    }
}

/// Yields a running sink instance given runtime info. Re-invoked when a
/// faulted service is restarted.
pub type TargetFactory =
    Arc<dyn Fn(&RuntimeInfo) -> Result<Box<dyn Target>, TargetError> + Send + Sync>;

pub type HealthCheckFactory =
    Arc<dyn Fn(&RuntimeInfo) -> Result<Box<dyn HealthCheck>, TargetError> + Send + Sync>;

/// A named message sink plus the factory that builds it.
#[derive(Clone)]
pub struct TargetConf {
    pub name: String,
    pub factory: TargetFactory,
}

impl TargetConf {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(&RuntimeInfo) -> Result<Box<dyn Target>, TargetError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        TargetConf {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }
}

/// A named measurement sink. Structurally a target; kept distinct so the
/// registry can order shutdown and scope internal logger names by kind.
#[derive(Clone)]
pub struct MetricConf {
    pub name: String,
    pub factory: TargetFactory,
}

impl MetricConf {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(&RuntimeInfo) -> Result<Box<dyn Target>, TargetError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        MetricConf {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }
}

/// A named periodic probe and how often to run it.
#[derive(Clone)]
pub struct HealthCheckConf {
    pub name: String,
    pub interval: Duration,
    pub factory: HealthCheckFactory,
}

impl HealthCheckConf {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        factory: impl Fn(&RuntimeInfo) -> Result<Box<dyn HealthCheck>, TargetError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        HealthCheckConf {
            name: name.into(),
            interval,
            factory: Arc::new(factory),
        }
    }
}

/// Resolves the minimum admitted level for a named logger. The name
/// hierarchy rules live outside the core; this is the seam they plug into.
pub type LevelPicker = Arc<dyn Fn(&PointName) -> LogLevel + Send + Sync>;

/// Everything the registry needs to come up: services, identity, middleware
/// and the processing pipeline.
#[derive(Clone)]
pub struct Conf {
    pub(crate) service: String,
    pub(crate) host: String,
    pub(crate) targets: Vec<TargetConf>,
    pub(crate) metrics: Vec<MetricConf>,
    pub(crate) health_checks: Vec<HealthCheckConf>,
    pub(crate) middleware: Vec<Middleware>,
    pub(crate) processing: Processing,
    pub(crate) clock: DynClock,
    pub(crate) internal_logger: Option<DynLogger>,
    pub(crate) level_picker: LevelPicker,
}

impl std::fmt::Debug for Conf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conf")
            .field("service", &self.service)
            .field("host", &self.host)
            .field("targets", &self.targets)
            .field("metrics", &self.metrics)
            .field("health_checks", &self.health_checks)
            .field("middleware", &self.middleware.len())
            .field("processing", &self.processing)
            .finish_non_exhaustive()
    }
}

impl Conf {
    pub fn builder(service: impl Into<String>, host: impl Into<String>) -> ConfBuilder {
        ConfBuilder {
            service: service.into(),
            host: host.into(),
            targets: Vec::new(),
            metrics: Vec::new(),
            health_checks: Vec::new(),
            middleware: Vec::new(),
            processing: Processing::default(),
            clock: Arc::new(SystemClock),
            internal_logger: None,
            level_picker: Arc::new(|_| LogLevel::Verbose),
        }
    }
}

pub struct ConfBuilder {
    service: String,
    host: String,
    targets: Vec<TargetConf>,
    metrics: Vec<MetricConf>,
    health_checks: Vec<HealthCheckConf>,
    middleware: Vec<Middleware>,
    processing: Processing,
    clock: DynClock,
    internal_logger: Option<DynLogger>,
    level_picker: LevelPicker,
}

impl ConfBuilder {
    pub fn target(mut self, conf: TargetConf) -> Self {
        self.targets.push(conf);
        self
    }

    pub fn metric(mut self, conf: MetricConf) -> Self {
        self.metrics.push(conf);
        self
    }

    pub fn health_check(mut self, conf: HealthCheckConf) -> Self {
        self.health_checks.push(conf);
        self
    }

    pub fn middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn processing(mut self, processing: Processing) -> Self {
        self.processing = processing;
        self
    }

    pub fn clock(mut self, clock: DynClock) -> Self {
        self.clock = clock;
        self
    }

    /// Override the logger the library uses for its own diagnostics.
    pub fn internal_logger(mut self, logger: DynLogger) -> Self {
        self.internal_logger = Some(logger);
        self
    }

    /// Every logger admits this level and above. Default: `Verbose`.
    pub fn logger_min_level(mut self, level: LogLevel) -> Self {
        self.level_picker = Arc::new(move |_| level);
        self
    }

    /// Resolve the admitted level per logger name.
    pub fn logger_levels(
        mut self,
        picker: impl Fn(&PointName) -> LogLevel + Send + Sync + 'static,
    ) -> Self {
        self.level_picker = Arc::new(picker);
        self
    }

    /// Validate and seal the configuration. Duplicate service names (across
    /// targets, metrics and health checks alike) are fatal here, before any
    /// actor is spawned.
    pub fn build(self) -> Result<Conf, ConfigError> {
        if self.service.is_empty() || self.host.is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        let mut seen = HashSet::new();
        let names = self
            .targets
            .iter()
            .map(|t| &t.name)
            .chain(self.metrics.iter().map(|m| &m.name))
            .chain(self.health_checks.iter().map(|h| &h.name));
        for name in names {
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }
        Ok(Conf {
            service: self.service,
            host: self.host,
            targets: self.targets,
            metrics: self.metrics,
            health_checks: self.health_checks,
            middleware: self.middleware,
            processing: self.processing,
            clock: self.clock,
            internal_logger: self.internal_logger,
            level_picker: self.level_picker,
        })
    }
}
