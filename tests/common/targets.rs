//! Test targets for integration tests.
//!
//! This module provides simple sink implementations useful for testing:
//! - `CollectorTarget`: records every delivered message for assertion
//! - `SlowTarget`: delays its flush acknowledgement by a configured amount
//! - `FlakyTarget`: fails the first delivery of its first incarnation

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use lantern::error::TargetError;
use lantern::message::Message;
use lantern::target::Target;

// ----------------------------------------------------------------------------
// CollectorTarget - records delivered messages for assertion
// ----------------------------------------------------------------------------

/// Global storage for collected messages, keyed by collector name. Lets
/// tests inspect deliveries after the pipeline has consumed them.
pub static COLLECTED: Lazy<Mutex<HashMap<String, Vec<Message>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub struct CollectorTarget {
    name: String,
}

impl CollectorTarget {
    pub fn new(name: &str) -> Self {
        COLLECTED
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        CollectorTarget {
            name: name.to_string(),
        }
    }

    /// Retrieve collected messages for a given collector name.
    pub fn messages(name: &str) -> Vec<Message> {
        COLLECTED
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop one collector's messages (call at the start of a test).
    pub fn clear(name: &str) {
        COLLECTED
            .lock()
            .unwrap()
            .insert(name.to_string(), Vec::new());
    }
}

#[async_trait]
impl Target for CollectorTarget {
    async fn consume(&mut self, msg: Message) -> Result<(), TargetError> {
        COLLECTED
            .lock()
            .unwrap()
            .entry(self.name.clone())
            .or_default()
            .push(msg);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// SlowTarget - sleeps before acknowledging a flush
// ----------------------------------------------------------------------------

pub struct SlowTarget {
    pub flush_delay: Duration,
}

#[async_trait]
impl Target for SlowTarget {
    async fn consume(&mut self, _msg: Message) -> Result<(), TargetError> {
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TargetError> {
        tokio::time::sleep(self.flush_delay).await;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// FlakyTarget - faults once, consumes normally after a rebuild
// ----------------------------------------------------------------------------

/// Constructions counted per flaky target name, so tests can observe the
/// supervisor rebuilding a faulted service from its factory.
pub static FLAKY_BUILDS: Lazy<Mutex<HashMap<String, usize>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub struct FlakyTarget {
    name: String,
    failures_left: usize,
}

impl FlakyTarget {
    pub fn new(name: &str) -> Self {
        let mut builds = FLAKY_BUILDS.lock().unwrap();
        let count = builds.entry(name.to_string()).or_insert(0);
        *count += 1;
        FlakyTarget {
            name: name.to_string(),
            // Only the first incarnation fails; rebuilds behave.
            failures_left: if *count == 1 { 1 } else { 0 },
        }
    }

    pub fn builds(name: &str) -> usize {
        FLAKY_BUILDS
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn clear(name: &str) {
        FLAKY_BUILDS.lock().unwrap().remove(name);
        CollectorTarget::clear(name);
    }
}

#[async_trait]
impl Target for FlakyTarget {
    async fn consume(&mut self, msg: Message) -> Result<(), TargetError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(TargetError::other("transient sink failure"));
        }
        COLLECTED
            .lock()
            .unwrap()
            .entry(self.name.clone())
            .or_default()
            .push(msg);
        Ok(())
    }
}
