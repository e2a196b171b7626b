//! packet-peer: a multiplexed TCP test peer.
//!
//! Accepts concurrent client connections, buffers each connection's bytes
//! until a pluggable `Handler` recognises a complete packet, and writes the
//! handler's response back. Meant to stand in for a real device or service
//! while running conformance and load tests against a client library.
//!
//! - One accept thread polls the listener and spawns a worker per connection
//! - Each connection owns a fixed slot of the configured buffer budget
//! - At most `max_clients` connections are served; extra ones wait in the
//!   listen backlog until a slot frees up
//! - Shutdown is cooperative through a shared `Shutdown` token

pub mod config;
pub mod protocols;
pub mod runtime;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use runtime::{Handler, ProcessResult, Status};
pub use server::{Server, ServerError};
pub use shutdown::Shutdown;
