//! Queue-based WebSocket connections
//!
//! Each upgraded socket is wrapped in a [`connection::Connection`] that exposes
//! `send`, `receive` and `close`, while background pumps do the socket I/O and
//! a heartbeat keeps idle clients busy.

pub mod config;
pub mod connection;
pub mod server;
