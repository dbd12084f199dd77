//! Per-connection tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Message;

/// Default capacity of the inbound and outbound queues
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default delay between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Default heartbeat payload
pub const DEFAULT_HEARTBEAT_PAYLOAD: &str = "heartbeat from server";

/// Upper bound on waiting for the socket to shut down
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Frame type used for heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatKind {
    /// Text frame, visible to client application code
    #[default]
    Text,
    /// Ping control frame, answered by the client's protocol layer
    Ping,
}

/// Options applied to every connection
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Capacity of each of the two queues (at least 1)
    pub queue_capacity: usize,
    /// Heartbeat period; `None` disables the heartbeat task
    pub heartbeat_interval: Option<Duration>,
    pub heartbeat_kind: HeartbeatKind,
    pub heartbeat_payload: String,
    pub close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_kind: HeartbeatKind::default(),
            heartbeat_payload: DEFAULT_HEARTBEAT_PAYLOAD.to_string(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity, clamped to at least 1
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the heartbeat period; a zero duration disables heartbeats
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn with_heartbeat(mut self, kind: HeartbeatKind, payload: impl Into<String>) -> Self {
        self.heartbeat_kind = kind;
        self.heartbeat_payload = payload.into();
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// The message enqueued on every heartbeat tick
    pub fn heartbeat_message(&self) -> Message {
        match self.heartbeat_kind {
            HeartbeatKind::Text => Message::text(self.heartbeat_payload.clone()),
            HeartbeatKind::Ping => Message::ping(self.heartbeat_payload.clone().into_bytes()),
        }
    }
}
