//! Connection handle
//!
//! Wraps one WebSocket behind a pair of bounded queues. Application code only
//! ever calls `send`, `receive` and `close`; the socket itself is driven by the
//! read pump, write pump and heartbeat tasks started in [`Connection::start`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{Sink, Stream};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info};
use uuid::Uuid;

use super::heartbeat::heartbeat;
use super::pump::{read_pump, write_pump};
use super::{ClosedSignal, ConnectionOptions, Message};

/// The connection has been closed; stop using it
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Connection closed")]
pub struct ConnectionClosed;

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionClosed>;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Pumps running, messages flowing
    Open,
    /// Closed signal fired, pumps still unwinding
    Closing,
    /// All pumps exited and the socket is released
    Closed,
}

/// Queue ends owned by the pumps rather than by the connection
pub(crate) struct PumpEnds {
    pub inbound_tx: mpsc::Sender<Message>,
    pub outbound_rx: mpsc::Receiver<Message>,
}

/// A single WebSocket connection
pub struct Connection {
    id: Uuid,
    peer_addr: Option<SocketAddr>,
    /// Consumer side of the inbound queue
    inbound: Mutex<mpsc::Receiver<Message>>,
    /// Producer side of the outbound queue
    outbound: mpsc::Sender<Message>,
    closed: ClosedSignal,
    /// Pumps that have been started and not yet exited
    running: AtomicUsize,
}

impl Connection {
    /// Create a connection and the queue ends its pumps will own
    pub(crate) fn new(peer_addr: Option<SocketAddr>, queue_capacity: usize) -> (Arc<Self>, PumpEnds) {
        let capacity = queue_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            closed: ClosedSignal::new(),
            running: AtomicUsize::new(0),
        });

        (
            connection,
            PumpEnds {
                inbound_tx,
                outbound_rx,
            },
        )
    }

    /// Take ownership of a socket and start its background tasks
    ///
    /// `sink` and `stream` are the two halves of the same socket. The read pump
    /// owns `stream`, the write pump owns `sink`, and the heartbeat (unless
    /// disabled) feeds the outbound queue.
    pub fn start<K, S>(
        sink: K,
        stream: S,
        peer_addr: Option<SocketAddr>,
        options: &ConnectionOptions,
    ) -> ConnectionTasks
    where
        K: Sink<WsMessage, Error = WsError> + Unpin + Send + 'static,
        S: Stream<Item = Result<WsMessage, WsError>> + Unpin + Send + 'static,
    {
        let (connection, ends) = Self::new(peer_addr, options.queue_capacity);
        info!(
            "Connection {} opened (peer: {:?}, queue capacity: {})",
            connection.id, peer_addr, options.queue_capacity
        );

        let mut handles = Vec::with_capacity(3);

        let guard = connection.enter_task();
        handles.push(tokio::spawn(read_pump(guard, stream, ends.inbound_tx)));

        let guard = connection.enter_task();
        handles.push(tokio::spawn(write_pump(
            guard,
            sink,
            ends.outbound_rx,
            options.close_timeout,
        )));

        if let Some(interval) = options.heartbeat_interval {
            let guard = connection.enter_task();
            handles.push(tokio::spawn(heartbeat(
                guard,
                interval,
                options.heartbeat_message(),
            )));
        }

        ConnectionTasks {
            connection,
            handles,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Queue a message for the write pump
    ///
    /// Waits while the outbound queue is full. Fails once the connection is
    /// closed, including when it closes while waiting for space.
    pub async fn send(&self, message: Message) -> ConnectionResult<()> {
        if self.closed.is_triggered() {
            return Err(ConnectionClosed);
        }
        tokio::select! {
            biased;
            _ = self.closed.wait() => Err(ConnectionClosed),
            sent = self.outbound.send(message) => sent.map_err(|_| ConnectionClosed),
        }
    }

    /// Take the next inbound message
    ///
    /// Waits until the read pump delivers one or the connection closes.
    pub async fn receive(&self) -> ConnectionResult<Message> {
        if self.closed.is_triggered() {
            return Err(ConnectionClosed);
        }
        tokio::select! {
            biased;
            _ = self.closed.wait() => Err(ConnectionClosed),
            received = async { self.inbound.lock().await.recv().await } => {
                received.ok_or(ConnectionClosed)
            }
        }
    }

    /// Close the connection
    ///
    /// Fires the closed signal; the write pump then releases the socket.
    /// Safe to call from any task, any number of times.
    pub fn close(&self) {
        if self.closed.trigger() {
            debug!("Connection {} closing", self.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    /// Wait until the connection is closed
    pub async fn closed(&self) {
        self.closed.wait().await
    }

    pub fn state(&self) -> ConnectionState {
        if !self.closed.is_triggered() {
            ConnectionState::Open
        } else if self.running.load(Ordering::Acquire) > 0 {
            ConnectionState::Closing
        } else {
            ConnectionState::Closed
        }
    }

    /// Register a pump as running until the returned guard drops
    pub(crate) fn enter_task(self: &Arc<Self>) -> TaskGuard {
        self.running.fetch_add(1, Ordering::AcqRel);
        TaskGuard {
            connection: Arc::clone(self),
        }
    }
}

/// Keeps a pump counted as running
pub(crate) struct TaskGuard {
    connection: Arc<Connection>,
}

impl TaskGuard {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.connection.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("Connection {} released", self.connection.id);
        }
    }
}

/// Background tasks of a started connection
pub struct ConnectionTasks {
    connection: Arc<Connection>,
    handles: Vec<JoinHandle<()>>,
}

impl ConnectionTasks {
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    /// Wait for every pump to exit
    ///
    /// Pumps only exit after the connection is closed, so this returns once the
    /// connection has reached [`ConnectionState::Closed`].
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                debug!("Connection {} task ended abnormally: {}", self.connection.id, e);
            }
        }
        info!("Connection {} closed", self.connection.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_new_connection_is_open() {
        let (conn, _ends) = Connection::new(None, 4);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_send_lands_on_outbound_queue_in_order() {
        let (conn, mut ends) = Connection::new(None, 8);
        for i in 0..5 {
            conn.send(Message::text(format!("m{}", i))).await.unwrap();
        }
        for i in 0..5 {
            let msg = ends.outbound_rx.recv().await.unwrap();
            assert_eq!(msg.as_text(), Some(format!("m{}", i).as_str()));
        }
    }

    #[tokio::test]
    async fn test_receive_preserves_inbound_order() {
        let (conn, ends) = Connection::new(None, 8);
        for i in 0..5u8 {
            ends.inbound_tx.send(Message::binary(vec![i])).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(conn.receive().await.unwrap(), Message::binary(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _ends) = Connection::new(None, 1);
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let (conn, ends) = Connection::new(None, 4);
        ends.inbound_tx.send(Message::text("queued")).await.unwrap();
        conn.close();

        assert_eq!(conn.send(Message::text("late")).await, Err(ConnectionClosed));
        assert_eq!(conn.receive().await, Err(ConnectionClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_unblocks_pending_receive() {
        let (conn, _ends) = Connection::new(None, 4);
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receive should unblock")
            .unwrap();
        assert_eq!(result, Err(ConnectionClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_blocks_until_close() {
        let capacity = 1000;
        let (conn, _ends) = Connection::new(None, capacity);
        for i in 0..capacity {
            conn.send(Message::text(i.to_string())).await.unwrap();
        }

        let blocked = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send(Message::text("overflow")).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "producer should wait for space");

        conn.close();
        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("send should unblock on close")
            .unwrap();
        assert_eq!(result, Err(ConnectionClosed));
    }

    #[tokio::test]
    async fn test_state_tracks_running_tasks() {
        let (conn, _ends) = Connection::new(None, 1);
        let guard = conn.enter_task();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closing);
        drop(guard);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
