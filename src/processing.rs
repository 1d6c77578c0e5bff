//! The user-supplied pipeline that decides whether and where each message is
//! emitted.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::message::{LogLevel, Message};

/// Forwards messages out of the processing stage and into the target layer.
/// May be invoked zero or more times per input message.
#[derive(Clone)]
pub struct Emit {
    tx: mpsc::UnboundedSender<Message>,
}

impl Emit {
    pub(crate) fn channel() -> (Emit, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Emit { tx }, rx)
    }

    pub fn emit(&self, msg: Message) {
        // The receiving side lives for the duration of the processing call.
        let _ = self.tx.send(msg);
    }
}

/// The compiled extension point: `Message x Emit -> task`.
pub type ProcessingFn = Arc<dyn Fn(Message, Emit) -> BoxFuture<'static, ()> + Send + Sync>;

/// A pipeline description that compiles into a [`ProcessingFn`].
///
/// Stages wrap the previous description, so chained calls read outside-in:
/// `Processing::route_all_to("console").min_level(LogLevel::Info)` filters
/// first, then routes.
#[derive(Clone)]
pub struct Processing(ProcessingFn);

impl Processing {
    /// Wrap an arbitrary async stage.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Message, Emit) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Processing(Arc::new(f))
    }

    /// Stamp every message with the given routing target and emit it.
    pub fn route_all_to(target: &str) -> Self {
        let target = target.to_string();
        Processing::custom(move |msg, emit| {
            let target = target.clone();
            Box::pin(async move {
                emit.emit(msg.set_target(target));
            })
        })
    }

    /// Emit one copy of every message per named target.
    pub fn fan_out(targets: &[&str]) -> Self {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        Processing::custom(move |msg, emit| {
            let targets = targets.clone();
            Box::pin(async move {
                for target in targets {
                    emit.emit(msg.clone().set_target(target));
                }
            })
        })
    }

    /// Suppress messages below `level` before they reach the inner stage.
    pub fn min_level(self, level: LogLevel) -> Self {
        let inner = self.0;
        Processing::custom(move |msg, emit| {
            if msg.level < level {
                Box::pin(async {})
            } else {
                inner(msg, emit)
            }
        })
    }

    pub(crate) fn into_fn(self) -> ProcessingFn {
        self.0
    }
}

impl Default for Processing {
    /// Emits nothing; every message is suppressed.
    fn default() -> Self {
        Processing::custom(|_msg, _emit| Box::pin(async {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(processing: Processing, msg: Message) -> Vec<Message> {
        let (emit, mut rx) = Emit::channel();
        (processing.into_fn())(msg, emit).await;
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn route_all_sets_target() {
        let out = run(
            Processing::route_all_to("console"),
            Message::event(LogLevel::Info, "hi"),
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target(), Some("console"));
    }

    #[tokio::test]
    async fn fan_out_emits_per_target() {
        let out = run(
            Processing::fan_out(&["a", "b"]),
            Message::event(LogLevel::Info, "hi"),
        )
        .await;
        let targets: Vec<_> = out.iter().filter_map(|m| m.target()).collect();
        assert_eq!(targets, ["a", "b"]);
    }

    #[tokio::test]
    async fn min_level_suppresses() {
        let stage = Processing::route_all_to("console").min_level(LogLevel::Warn);
        let dropped = run(stage.clone(), Message::event(LogLevel::Info, "low")).await;
        assert!(dropped.is_empty());
        let kept = run(stage, Message::event(LogLevel::Error, "high")).await;
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn default_emits_nothing() {
        let out = run(Processing::default(), Message::event(LogLevel::Fatal, "x")).await;
        assert!(out.is_empty());
    }
}
