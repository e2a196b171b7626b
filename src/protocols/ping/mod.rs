//! Line-based ping.
//!
//! ```text
//! -> PING\r\n          <- PONG\r\n
//! -> PING hello\r\n    <- PONG hello\r\n
//! -> QUIT\r\n          (connection closed)
//! ```
//!
//! Any other line is reported as unsupported and skipped, so a client can
//! check that a bad request does not cost it the connection.

pub mod handler;
pub mod parser;

pub use handler::PingHandler;
