//! Scoped tracing units with hierarchical IDs.
//!
//! A span records a begin instant at construction and emits exactly one
//! completion message when finished, no matter how many times `finish` is
//! invoked or whether the span is simply dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::config::{DynClock, RuntimeInfo, SystemClock};
use crate::error::LogError;
use crate::logger::DynLogger;
use crate::message::{LogLevel, Message, SPAN_ID_KEY, SPAN_INFO_KEY};
use crate::value::Value;

/// 100 ns units since the unix epoch.
pub(crate) fn ticks(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros() * 10
}

/// Allocates span identifiers of the form
/// `#{host}-{service}.{hex}[.{hex}]*`.
///
/// One monotonic counter is kept per parent ID; the root counter is keyed by
/// the empty string. Counters wrap around on u64 overflow, so after 2^64
/// allocations under one parent, IDs repeat.
pub struct SpanIdGenerator {
    prefix: String,
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl SpanIdGenerator {
    pub fn new(host: &str, service: &str) -> Self {
        SpanIdGenerator {
            prefix: format!("#{}-{}", host, service),
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_runtime(runtime: &RuntimeInfo) -> Self {
        SpanIdGenerator::new(&runtime.host, &runtime.service)
    }

    /// Trimmed parent; missing, empty and all-whitespace parents all denote a
    /// root span.
    fn normalize(parent: Option<&str>) -> &str {
        parent.map(str::trim).unwrap_or("")
    }

    fn counter_for(&self, key: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().unwrap().get(key) {
            return counter.clone();
        }
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Allocate the next ID under `parent`. Concurrent calls with the same
    /// parent never observe the same counter value.
    ///
    /// A parent that already carries this generator's local prefix is reused
    /// as the base, so locally-created children extend their parent's ID. A
    /// foreign parent (propagated from another process) is re-based under the
    /// local prefix while keeping the original ID embedded.
    pub fn generate(&self, parent: Option<&str>) -> String {
        let parent = Self::normalize(parent);
        let n = self.counter_for(parent).fetch_add(1, Ordering::Relaxed);
        if parent.is_empty() {
            format!("{}.{:x}", self.prefix, n)
        } else if parent.contains(&self.prefix) {
            format!("{}.{:x}", parent, n)
        } else {
            format!("{}.{}.{:x}", self.prefix, parent, n)
        }
    }

    /// Drop the counter held for `parent`. Invoked when a span finishes so
    /// the map does not grow with completed spans.
    pub fn remove(&self, parent: &str) {
        self.counters.write().unwrap().remove(parent);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.counters.read().unwrap().len()
    }
}

/// Identification attached to a span's completion message under
/// [`SPAN_INFO_KEY`]. Instants are unix ticks (100 ns, int64).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanInfo {
    pub id: String,
    pub begin_at: i64,
    pub end_at: i64,
    pub duration: i64,
}

impl SpanInfo {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.insert("beginAt".to_string(), Value::Int64(self.begin_at));
        map.insert("endAt".to_string(), Value::Int64(self.end_at));
        map.insert("duration".to_string(), Value::Int64(self.duration));
        Value::Object(map)
    }
}

/// A scoped tracing unit. Dropping an unfinished span fires its completion
/// message on a detached task.
pub struct Span {
    id: String,
    parent_id: Option<String>,
    begin_at: DateTime<Utc>,
    logger: DynLogger,
    has_fired: AtomicBool,
    clock: DynClock,
    id_gen: Arc<SpanIdGenerator>,
}

impl Span {
    /// Start a root span.
    pub fn root(logger: DynLogger, id_gen: Arc<SpanIdGenerator>) -> Self {
        Span::with_parent(logger, id_gen, None)
    }

    /// Start a span under `parent`, which may come from another process.
    pub fn with_parent(
        logger: DynLogger,
        id_gen: Arc<SpanIdGenerator>,
        parent: Option<&str>,
    ) -> Self {
        Span::build(logger, id_gen, Arc::new(SystemClock), parent)
    }

    pub(crate) fn build(
        logger: DynLogger,
        id_gen: Arc<SpanIdGenerator>,
        clock: DynClock,
        parent: Option<&str>,
    ) -> Self {
        let id = id_gen.generate(parent);
        Span {
            id,
            parent_id: parent
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            begin_at: clock.now(),
            logger,
            has_fired: AtomicBool::new(false),
            clock,
            id_gen,
        }
    }

    /// Start a child span of this one, sharing logger and clock.
    pub fn child(&self) -> Span {
        Span::build(
            self.logger.clone(),
            self.id_gen.clone(),
            self.clock.clone(),
            Some(&self.id),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn begin_at(&self) -> DateTime<Utc> {
        self.begin_at
    }

    fn completion_message(&self, end_at: DateTime<Utc>) -> Message {
        let info = SpanInfo {
            id: self.id.clone(),
            begin_at: ticks(self.begin_at),
            end_at: ticks(end_at),
            duration: ticks(end_at) - ticks(self.begin_at),
        };
        Message::event(LogLevel::Info, "span completed")
            .set_context(SPAN_INFO_KEY, info.to_value())
            .set_context(SPAN_ID_KEY, self.id.as_str())
    }

    /// Emit the completion message, once. The first call wins; later calls
    /// return an already-completed ack and emit nothing.
    pub async fn finish<F>(&self, transform: F) -> Result<(), LogError>
    where
        F: FnOnce(Message) -> Message,
    {
        if self.has_fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.id_gen.remove(&self.id);
        let end_at = self.clock.now();
        let msg = transform(self.completion_message(end_at));
        self.logger
            .log_with_ack(LogLevel::Info, &move |_| msg.clone())
            .await
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.has_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.id_gen.remove(&self.id);
        let msg = self.completion_message(self.clock.now());
        let logger = self.logger.clone();
        // Fire-and-forget; outside a runtime the completion is dropped.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = logger.log(LogLevel::Info, &move |_| msg.clone()).await;
            });
        }
    }
}
