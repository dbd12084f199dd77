//! WebSocket server module
//!
//! Accepts WebSocket upgrades and serves each socket through a queue-based
//! connection driven by the echo application loop.

mod handler;
mod websocket;

pub use handler::*;
pub use websocket::*;
