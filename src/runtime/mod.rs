//! Connection runtime.
//!
//! Shared pieces used by the accept loop in `server`:
//! - `BufferPool`: per-slot buffer regions
//! - `ConnectionRegistry`: tracked connections
//! - `Worker`: per-connection read/handle/write state machine
//! - `Handler`: contract for packet codecs

mod buffer;
mod connection;
pub mod protocol;
mod stats;
mod worker;

pub use buffer::{BufferPool, SlotBuffer};
pub use connection::{ConnState, Connection, ConnectionRegistry, ExitReason};
pub use protocol::{copy_response, Handler, ProcessResult, Status};
pub use stats::{ServerStats, StatsSnapshot};
pub use worker::{Worker, WorkerContext, WorkerExit};
