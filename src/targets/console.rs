//! ConsoleTarget - renders messages as JSON lines.

use std::io::{self, Write};

use async_trait::async_trait;
use serde_json::json;

use crate::error::TargetError;
use crate::message::Message;
use crate::target::Target;

/// Writes one JSON object per message to stdout, or to any supplied writer.
pub struct ConsoleTarget {
    writer: Box<dyn Write + Send + Sync>,
}

impl ConsoleTarget {
    pub fn new() -> Self {
        ConsoleTarget {
            writer: Box::new(io::stdout()),
        }
    }

    pub fn with_writer(writer: impl Write + Send + Sync + 'static) -> Self {
        ConsoleTarget {
            writer: Box::new(writer),
        }
    }

    fn render(msg: &Message) -> Result<String, TargetError> {
        let line = json!({
            "name": msg.name.to_string(),
            "level": msg.level.as_str(),
            "value": msg.value,
            "context": msg.context,
            "timestamp": msg.timestamp.to_rfc3339(),
        });
        serde_json::to_string(&line).map_err(|e| TargetError::other(e.to_string()))
    }
}

impl Default for ConsoleTarget {
    fn default() -> Self {
        ConsoleTarget::new()
    }
}

#[async_trait]
impl Target for ConsoleTarget {
    async fn consume(&mut self, msg: Message) -> Result<(), TargetError> {
        let line = Self::render(&msg)?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TargetError> {
        self.writer.flush()?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TargetError> {
        self.writer.flush()?;
        Ok(())
    }
}
