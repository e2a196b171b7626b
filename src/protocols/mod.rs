//! Built-in packet handlers.
//!
//! Each protocol has a parser and a `Handler` implementation that the
//! connection workers drive.
//!
//! - `echo`: length-delimited packets echoed back verbatim
//! - `ping`: line-based ping/pong

pub mod echo;
pub mod ping;

pub use echo::EchoHandler;
pub use ping::PingHandler;
