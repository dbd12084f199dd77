//! Queue-based WebSocket connection
//!
//! Hides a socket behind `send` / `receive` / `close`. A read pump, a write
//! pump and a heartbeat task move data between the socket and two bounded
//! queues, and all of them stop when the shared closed signal fires.

mod handle;
mod heartbeat;
mod message;
mod options;
mod pump;
mod signal;

pub use handle::*;
pub use message::*;
pub use options::*;
pub use signal::*;

#[cfg(test)]
pub(crate) use pump::testing;
