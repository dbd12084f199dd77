//! Application loop
//!
//! Consumes a connection's inbound messages and answers them. The loop handles
//! one message at a time. Processing messages concurrently would need a
//! bounded worker pool so a chatty client cannot spawn unbounded work.

use std::sync::Arc;

use tracing::debug;

use crate::connection::{Connection, ConnectionClosed, Message};

/// Echoes every message back to its sender
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl EchoHandler {
    pub fn new() -> Self {
        Self
    }

    /// Reply to a single message
    pub fn respond(&self, message: Message) -> Message {
        message
    }

    /// Run until the connection closes
    ///
    /// Returns the number of messages echoed.
    pub async fn run(self, conn: Arc<Connection>) -> usize {
        let mut echoed = 0;
        loop {
            match self.step(&conn).await {
                Ok(()) => echoed += 1,
                Err(ConnectionClosed) => break,
            }
        }
        debug!("Connection {} application loop exited after {} messages", conn.id(), echoed);
        echoed
    }

    async fn step(&self, conn: &Connection) -> Result<(), ConnectionClosed> {
        let message = conn.receive().await?;
        match message.as_text() {
            Some(text) => debug!("Connection {} received: {}", conn.id(), text),
            None => debug!(
                "Connection {} received {:?} ({} bytes)",
                conn.id(),
                message.kind(),
                message.len()
            ),
        }
        conn.send(self.respond(message)).await
    }
}
