//! The message router: runs the processing pipeline and fans out to named
//! subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kameo::prelude::*;
use tokio::sync::mpsc;

use crate::error::{LogError, TargetError};
use crate::logger::{Logger, MessageFactory, Middleware};
use crate::message::{LogLevel, Message as LogMessage, PointName};
use crate::processing::{Emit, Processing, ProcessingFn};

/// The capability a subscriber exposes to the engine: accept one message.
///
/// Delivery order per subscriber follows engine arrival order; the engine
/// awaits each delivery before routing the next emitted message.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, msg: LogMessage) -> Result<(), TargetError>;
}

pub type DynSink = Arc<dyn MessageSink>;

/// Unbounded senders are sinks; handy for tests and for wiring the engine to
/// plain channel consumers.
#[async_trait]
impl MessageSink for mpsc::UnboundedSender<LogMessage> {
    async fn deliver(&self, msg: LogMessage) -> Result<(), TargetError> {
        self.send(msg)
            .map_err(|_| TargetError::other("subscriber channel closed"))
    }
}

/// Register a sink under a key. Re-subscribing a key replaces the prior sink.
pub struct Subscribe {
    pub key: String,
    pub sink: DynSink,
}

/// Remove a sink. A missing key is a no-op.
pub struct Unsubscribe {
    pub key: String,
}

/// One log event entering the pipeline. `ask` resolves once the processing
/// function has run to completion and emitted messages are handed to their
/// subscribers.
pub struct Ingest(pub LogMessage);

/// Observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, kameo::Reply)]
pub struct EngineStats {
    pub processed: u64,
    pub emitted: u64,
    /// Emitted messages with a missing or unknown `"target"` key. Dropped
    /// silently by design; this counter is the only trace they leave.
    pub dropped: u64,
}

pub struct GetStats;

/// Terminal: the engine accepts no further input once stopped.
pub struct StopEngine;

/// Single-threaded cooperative router. The actor mailbox is the ingress, so
/// messages from one sender are processed in arrival order.
#[derive(Actor)]
pub struct Engine {
    processing: ProcessingFn,
    subscribers: HashMap<String, DynSink>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(processing: Processing) -> Self {
        Engine {
            processing: processing.into_fn(),
            subscribers: HashMap::new(),
            stats: EngineStats::default(),
        }
    }

    async fn route(&mut self, msg: LogMessage) {
        let Some(name) = msg.target().map(str::to_string) else {
            self.stats.dropped += 1;
            return;
        };
        match self.subscribers.get(&name) {
            Some(sink) => {
                self.stats.emitted += 1;
                if let Err(e) = sink.deliver(msg).await {
                    tracing::warn!(target_name = %name, error = %e, "subscriber rejected message");
                }
            }
            None => {
                self.stats.dropped += 1;
                tracing::debug!(target_name = %name, "no subscriber for routed message");
            }
        }
    }
}

impl Message<Subscribe> for Engine {
    type Reply = ();
    async fn handle(
        &mut self,
        msg: Subscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.subscribers.insert(msg.key, msg.sink);
    }
}

impl Message<Unsubscribe> for Engine {
    type Reply = ();
    async fn handle(
        &mut self,
        msg: Unsubscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.subscribers.remove(&msg.key);
    }
}

impl Message<Ingest> for Engine {
    type Reply = ();
    async fn handle(
        &mut self,
        Ingest(msg): Ingest,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.stats.processed += 1;

        let (emit, mut rx) = Emit::channel();
        let processing = self.processing.clone();
        let fut = tokio::spawn(processing(msg, emit));

        // The pipeline stage runs on its own task so a panic inside
        // user-supplied code lands here as a JoinError instead of taking the
        // router down with it.
        if let Err(e) = fut.await {
            tracing::error!(error = %e, "processing stage panicked; continuing with next message");
            return;
        }

        while let Ok(emitted) = rx.try_recv() {
            self.route(emitted).await;
        }
    }
}

impl Message<GetStats> for Engine {
    type Reply = EngineStats;
    async fn handle(
        &mut self,
        _msg: GetStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.stats
    }
}

impl Message<StopEngine> for Engine {
    type Reply = ();
    async fn handle(
        &mut self,
        _msg: StopEngine,
        ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        ctx.actor_ref().kill();
    }
}

/// A logger whose sends feed the engine's ingress.
///
/// The logger stamps its own name onto every admitted message and applies
/// its middleware chain before handing the message over. `log` is
/// fire-and-forget; `log_with_ack` resolves once the processing pipeline has
/// run for the message. Both fail with [`LogError::Stopped`] once the engine
/// is gone; with the default unbounded mailbox `log` never reports
/// [`LogError::BufferFull`].
pub struct EngineLogger {
    name: PointName,
    level: LogLevel,
    engine: ActorRef<Engine>,
    middleware: Middleware,
}

impl EngineLogger {
    pub fn new(
        name: PointName,
        level: LogLevel,
        engine: ActorRef<Engine>,
        middleware: Middleware,
    ) -> Self {
        EngineLogger {
            name,
            level,
            engine,
            middleware,
        }
    }

    fn build(&self, level: LogLevel, factory: MessageFactory<'_>) -> LogMessage {
        (self.middleware)(factory(level).with_name(self.name.clone()))
    }
}

#[async_trait]
impl Logger for EngineLogger {
    fn name(&self) -> &PointName {
        &self.name
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    async fn log(&self, level: LogLevel, factory: MessageFactory<'_>) -> Result<(), LogError> {
        if level < self.level {
            return Ok(());
        }
        let msg = self.build(level, factory);
        self.engine
            .tell(Ingest(msg))
            .await
            .map_err(|_| LogError::Stopped)
    }

    async fn log_with_ack(
        &self,
        level: LogLevel,
        factory: MessageFactory<'_>,
    ) -> Result<(), LogError> {
        if level < self.level {
            return Ok(());
        }
        let msg = self.build(level, factory);
        self.engine
            .ask(Ingest(msg))
            .await
            .map_err(|_| LogError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> LogMessage {
        LogMessage::event(LogLevel::Info, text)
    }

    #[tokio::test]
    async fn routes_to_named_subscriber() {
        let engine = Engine::spawn(Engine::new(Processing::route_all_to("console")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .ask(Subscribe {
                key: "console".to_string(),
                sink: Arc::new(tx),
            })
            .await
            .unwrap();

        engine.ask(Ingest(event("hi"))).await.unwrap();
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.target(), Some("console"));
    }

    #[tokio::test]
    async fn unknown_target_is_counted_not_errored() {
        let engine = Engine::spawn(Engine::new(Processing::route_all_to("missing")));
        engine.ask(Ingest(event("hi"))).await.unwrap();
        let stats = engine.ask(GetStats).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.emitted, 0);
    }

    #[tokio::test]
    async fn resubscribe_replaces_prior_sink() {
        let engine = Engine::spawn(Engine::new(Processing::route_all_to("t")));
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        engine
            .ask(Subscribe {
                key: "t".to_string(),
                sink: Arc::new(tx1),
            })
            .await
            .unwrap();
        engine
            .ask(Subscribe {
                key: "t".to_string(),
                sink: Arc::new(tx2),
            })
            .await
            .unwrap();

        engine.ask(Ingest(event("after"))).await.unwrap();
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.recv().await.unwrap().target(), Some("t"));
    }

    #[tokio::test]
    async fn unsubscribe_missing_key_is_noop() {
        let engine = Engine::spawn(Engine::new(Processing::default()));
        engine
            .ask(Unsubscribe {
                key: "ghost".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn survives_panicking_processing() {
        let processing = Processing::custom(|_msg, _emit| {
            Box::pin(async {
                panic!("stage blew up");
            })
        });
        let engine = Engine::spawn(Engine::new(processing));
        engine.ask(Ingest(event("boom"))).await.unwrap();
        // Still alive and serving.
        let stats = engine.ask(GetStats).await.unwrap();
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn preserves_per_target_order() {
        let engine = Engine::spawn(Engine::new(Processing::route_all_to("t")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .ask(Subscribe {
                key: "t".to_string(),
                sink: Arc::new(tx),
            })
            .await
            .unwrap();

        for i in 0..10 {
            engine.tell(Ingest(event(&format!("m{}", i)))).await.unwrap();
        }
        engine.ask(GetStats).await.unwrap();

        for i in 0..10 {
            let msg = rx.recv().await.unwrap();
            match &msg.value {
                crate::value::Value::String(s) => assert_eq!(s, &format!("m{}", i)),
                other => panic!("unexpected value {:?}", other),
            }
        }
    }
}
