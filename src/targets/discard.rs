//! DiscardTarget - consumes and discards all messages.

use async_trait::async_trait;

use crate::error::TargetError;
use crate::message::Message;
use crate::target::Target;

/// Consumes all messages without doing anything.
///
/// Useful for:
/// - Benchmarking the pipeline without sink overhead
/// - Terminating routes whose output isn't needed
/// - Testing configurations
#[derive(Debug, Default)]
pub struct DiscardTarget {
    count: u64,
}

impl DiscardTarget {
    /// Returns the number of messages discarded.
    pub fn count(&self) -> u64 {
        self.count
    }
}

#[async_trait]
impl Target for DiscardTarget {
    async fn consume(&mut self, _msg: Message) -> Result<(), TargetError> {
        self.count += 1;
        Ok(())
    }
}
