//! Socket pumps
//!
//! The read pump is the only reader of the socket and the only producer of the
//! inbound queue. The write pump is the only writer of the socket and the only
//! consumer of the outbound queue. Both race every wait against the closed
//! signal and turn any socket fault into a connection-wide close.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace, warn};

use super::handle::TaskGuard;
use super::{Message, MessageKind};

/// Move frames from the socket onto the inbound queue
pub(crate) async fn read_pump<S>(guard: TaskGuard, mut stream: S, inbound: mpsc::Sender<Message>)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let conn = guard.connection();

    loop {
        let next = tokio::select! {
            biased;
            _ = conn.closed() => break,
            next = stream.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!("Connection {} read failed: {}", conn.id(), e);
                conn.close();
                break;
            }
            None => {
                debug!("Connection {} reached end of stream", conn.id());
                conn.close();
                break;
            }
        };

        let message = match Message::try_from(frame) {
            Ok(message) if message.kind().is_data() => message,
            Ok(message) if message.kind() == MessageKind::Close => {
                debug!("Connection {} closed by peer", conn.id());
                conn.close();
                break;
            }
            Ok(message) => {
                trace!("Connection {} {:?} frame handled by protocol layer", conn.id(), message.kind());
                continue;
            }
            Err(e) => {
                trace!("Connection {} skipped frame: {}", conn.id(), e);
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = conn.closed() => break,
            queued = inbound.send(message) => {
                if queued.is_err() {
                    conn.close();
                    break;
                }
            }
        }
    }

    trace!("Connection {} read pump exited", conn.id());
}

/// Move messages from the outbound queue onto the socket
///
/// On exit this pump closes the socket. It is the only code path that does, so
/// the socket is closed exactly once however many tasks call `close`.
pub(crate) async fn write_pump<K>(
    guard: TaskGuard,
    mut sink: K,
    mut outbound: mpsc::Receiver<Message>,
    close_timeout: Duration,
) where
    K: Sink<WsMessage, Error = WsError> + Unpin,
{
    let conn = guard.connection();

    loop {
        let message = tokio::select! {
            biased;
            _ = conn.closed() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => {
                    conn.close();
                    break;
                }
            },
        };

        let frame = match WsMessage::try_from(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Connection {} cannot frame outbound message: {}", conn.id(), e);
                conn.close();
                break;
            }
        };

        let written = tokio::select! {
            biased;
            _ = conn.closed() => break,
            written = sink.send(frame) => written,
        };

        if let Err(e) = written {
            debug!("Connection {} write failed: {}", conn.id(), e);
            conn.close();
            break;
        }
    }

    // Queued messages are abandoned; the connection is closing.
    outbound.close();

    match tokio::time::timeout(close_timeout, sink.close()).await {
        Ok(Ok(())) => trace!("Connection {} socket closed", conn.id()),
        Ok(Err(e)) => trace!("Connection {} socket close error: {}", conn.id(), e),
        Err(_) => debug!("Connection {} socket close timed out", conn.id()),
    }
    trace!("Connection {} write pump exited", conn.id());
}
