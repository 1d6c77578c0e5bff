//! Integration tests for message routing through the engine.
//!
//! These tests validate end-to-end flows using:
//! - a processing stage that routes into named targets
//! - CollectorTarget sinks that record deliveries for assertion

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lantern::config::{Conf, TargetConf};
use lantern::logger::Middleware;
use lantern::manager::LogManager;
use lantern::message::{LogLevel, Message, PointName};
use lantern::processing::Processing;
use lantern::value::Value;

use common::targets::CollectorTarget;

fn collector(name: &'static str) -> TargetConf {
    TargetConf::new(name, move |_| Ok(Box::new(CollectorTarget::new(name))))
}

async fn manager_with(name: &'static str, processing: Processing) -> LogManager {
    let conf = Conf::builder("svc", "host")
        .target(collector(name))
        .processing(processing)
        .build()
        .unwrap();
    LogManager::create(conf).await.unwrap()
}

/// Test 1: Single target happy path
/// Processing stamps `"target" = "console"` onto every message; a logger
/// named `app` sends one Info event and the sink receives exactly that.
#[tokio::test]
async fn single_target_happy_path() {
    CollectorTarget::clear("console");

    let processing = Processing::custom(|msg, emit| {
        Box::pin(async move {
            emit.emit(msg.set_target("console"));
        })
    });
    let manager = manager_with("console", processing).await;

    let logger = manager.get_logger(["app"]).await.unwrap();
    logger
        .log_with_ack(LogLevel::Info, &|lvl| Message::event(lvl, "hi"))
        .await
        .unwrap();
    manager.flush_pending(None).await.unwrap();

    let messages = CollectorTarget::messages("console");
    assert_eq!(messages.len(), 1, "expected 1 message, got {}", messages.len());
    assert_eq!(messages[0].name, PointName::from(["app"]));
    assert_eq!(messages[0].level, LogLevel::Info);
    assert_eq!(messages[0].target(), Some("console"));
    assert_eq!(messages[0].value, Value::from("hi"));
}

/// Test 2: Unknown target routing
/// Processing emits with an unregistered target name: no delivery, no error.
#[tokio::test]
async fn unknown_target_is_dropped_silently() {
    CollectorTarget::clear("known");

    let manager = manager_with("known", Processing::route_all_to("missing")).await;
    let logger = manager.get_logger(["app"]).await.unwrap();
    logger
        .log_with_ack(LogLevel::Info, &|lvl| Message::event(lvl, "hi"))
        .await
        .unwrap();
    manager.flush_pending(None).await.unwrap();

    assert!(CollectorTarget::messages("known").is_empty());
}

/// Test 3: Lazy message construction
/// The factory runs iff the send level passes the logger's admitted level.
#[tokio::test]
async fn factory_runs_iff_level_admitted() {
    CollectorTarget::clear("lazy");

    let conf = Conf::builder("svc", "host")
        .target(collector("lazy"))
        .processing(Processing::route_all_to("lazy"))
        .logger_min_level(LogLevel::Warn)
        .build()
        .unwrap();
    let manager = LogManager::create(conf).await.unwrap();
    let logger = manager.get_logger(["app"]).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));

    let counted = calls.clone();
    logger
        .log(LogLevel::Info, &move |lvl| {
            counted.fetch_add(1, Ordering::SeqCst);
            Message::event(lvl, "filtered")
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0, "factory ran for a filtered level");

    let counted = calls.clone();
    logger
        .log_with_ack(LogLevel::Error, &move |lvl| {
            counted.fetch_add(1, Ordering::SeqCst);
            Message::event(lvl, "admitted")
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    manager.flush_pending(None).await.unwrap();
    assert_eq!(CollectorTarget::messages("lazy").len(), 1);
}

/// Test 4: Per-target FIFO
/// Messages from one logger reach the target in send order.
#[tokio::test]
async fn per_target_order_is_preserved() {
    CollectorTarget::clear("ordered");

    let manager = manager_with("ordered", Processing::route_all_to("ordered")).await;
    let logger = manager.get_logger(["app"]).await.unwrap();

    for i in 0..20 {
        let text = format!("m{}", i);
        logger
            .log(LogLevel::Info, &move |lvl| Message::event(lvl, text.clone()))
            .await
            .unwrap();
    }
    // Ack the last send so everything before it has passed the engine.
    logger
        .log_with_ack(LogLevel::Info, &|lvl| Message::event(lvl, "last"))
        .await
        .unwrap();
    manager.flush_pending(None).await.unwrap();

    let messages = CollectorTarget::messages("ordered");
    assert_eq!(messages.len(), 21);
    for (i, msg) in messages.iter().take(20).enumerate() {
        assert_eq!(msg.value, Value::from(format!("m{}", i)));
    }
}

/// Test 5: Processing may split one input into several deliveries.
#[tokio::test]
async fn processing_can_split_messages() {
    CollectorTarget::clear("split");

    let processing = Processing::custom(|msg, emit| {
        Box::pin(async move {
            emit.emit(msg.clone().set_target("split"));
            emit.emit(msg.set_target("split"));
        })
    });
    let manager = manager_with("split", processing).await;
    let logger = manager.get_logger(["app"]).await.unwrap();
    logger
        .log_with_ack(LogLevel::Info, &|lvl| Message::event(lvl, "twice"))
        .await
        .unwrap();
    manager.flush_pending(None).await.unwrap();

    assert_eq!(CollectorTarget::messages("split").len(), 2);
}

/// Test 6: Middleware composition
/// Registry middleware wraps call-site middleware, so its writes win.
#[tokio::test]
async fn registry_middleware_wraps_call_site() {
    CollectorTarget::clear("mw");

    let registry_mw: Middleware = Arc::new(|m| m.set_context("who", "registry"));
    let conf = Conf::builder("svc", "host")
        .target(collector("mw"))
        .processing(Processing::route_all_to("mw"))
        .middleware(registry_mw)
        .build()
        .unwrap();
    let manager = LogManager::create(conf).await.unwrap();

    let call_site: Middleware = Arc::new(|m| {
        m.set_context("who", "call-site")
            .set_context("seen", true)
    });
    let logger = manager
        .get_logger_with_middleware(["app"], call_site)
        .await
        .unwrap();
    logger
        .log_with_ack(LogLevel::Info, &|lvl| Message::event(lvl, "x"))
        .await
        .unwrap();
    manager.flush_pending(None).await.unwrap();

    let messages = CollectorTarget::messages("mw");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].context_value("who"), Some(&Value::from("registry")));
    assert_eq!(messages[0].context_value("seen"), Some(&Value::from(true)));
}

/// Test 7: Promised logger
/// `get_logger_sync` is usable immediately; held messages replay once the
/// backing logger resolves.
#[tokio::test]
async fn promised_logger_replays_buffered_messages() {
    CollectorTarget::clear("promised");

    let manager = manager_with("promised", Processing::route_all_to("promised")).await;
    let logger = manager.get_logger_sync(["app"]);
    logger
        .log(LogLevel::Info, &|lvl| Message::event(lvl, "early"))
        .await
        .unwrap();

    // Give the resolution task a moment, then fence deliveries.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    manager.flush_pending(None).await.unwrap();

    let messages = CollectorTarget::messages("promised");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].name, PointName::from(["app"]));
}
