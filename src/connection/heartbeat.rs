//! Periodic liveness traffic
//!
//! Heartbeats go through the outbound queue like any other message, so the
//! write pump stays the single source of write ordering.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::handle::TaskGuard;
use super::Message;

pub(crate) async fn heartbeat(guard: TaskGuard, period: Duration, beat: Message) {
    let conn = guard.connection();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => break,
            _ = ticker.tick() => {}
        }

        if conn.send(beat.clone()).await.is_err() {
            debug!("Connection {} heartbeat failed", conn.id());
            conn.close();
            break;
        }
        trace!("Connection {} heartbeat queued", conn.id());
    }
}
