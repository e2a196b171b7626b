//! Length-delimited echo.
//!
//! Every packet is a decimal length line followed by exactly that many
//! payload bytes, and is sent back unchanged, header included:
//!
//! ```text
//! -> 5\r\nhello
//! <- 5\r\nhello
//! ```
//!
//! Useful for checking that a client's writes survive fragmentation and
//! pipelining intact. `QUIT\r\n` closes the connection. A length line that
//! is not a number is skipped without closing anything, and a packet that
//! could never fit in the connection's buffer is discarded.

pub mod handler;
pub mod parser;

pub use handler::EchoHandler;
