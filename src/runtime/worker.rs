//! Per-connection worker.
//!
//! Each accepted connection gets its own thread running a small state
//! machine over the connection's slot buffer:
//!
//! ```text
//! Reading --data--> Handling --response--> Writing
//!    ^                 |  ^                   |
//!    +---incomplete----+  +---bytes left------+
//!    +----------------------nothing left------+
//! ```
//!
//! Any socket error, a peer close, or a handler `Done` moves the worker to
//! `Closing`. The worker owns its stream, so closing happens exactly once,
//! when the worker is dropped.

use crate::config::WritePolicy;
use crate::runtime::buffer::SlotBuffer;
use crate::runtime::connection::{ConnState, ExitReason};
use crate::runtime::protocol::{Handler, ProcessResult, Status};
use crate::runtime::stats::ServerStats;
use crate::shutdown::Shutdown;
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// Bytes of a rejected packet shown in logs.
const DUMP_PREVIEW: usize = 32;

/// Everything a worker shares with the rest of the server.
pub struct WorkerContext<H> {
    pub handler: Arc<H>,
    pub shutdown: Shutdown,
    pub stats: Arc<ServerStats>,
    pub write_policy: WritePolicy,
}

impl<H> Clone for WorkerContext<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            shutdown: self.shutdown.clone(),
            stats: Arc::clone(&self.stats),
            write_policy: self.write_policy,
        }
    }
}

/// Message a worker sends back to the accept loop when it stops.
#[derive(Debug)]
pub struct WorkerExit {
    pub conn_id: usize,
    pub buffer: SlotBuffer,
    pub reason: ExitReason,
}

/// One connection's read/handle/write loop.
pub struct Worker<S, H> {
    conn_id: usize,
    stream: S,
    buffer: SlotBuffer,
    ctx: WorkerContext<H>,
    state: ConnState,
    /// Bytes buffered in the input view.
    filled: usize,
}

impl<S: Read + Write, H: Handler> Worker<S, H> {
    pub fn new(conn_id: usize, stream: S, buffer: SlotBuffer, ctx: WorkerContext<H>) -> Self {
        Self {
            conn_id,
            stream,
            buffer,
            ctx,
            state: ConnState::Reading,
            filled: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Drive the connection until it is done or shutdown is requested.
    pub fn run(&mut self) -> ExitReason {
        debug!(
            conn_id = self.conn_id,
            slot = self.buffer.slot(),
            "Worker entering processing loop"
        );

        while self.state != ConnState::Closing {
            if self.ctx.shutdown.is_triggered() {
                debug!(conn_id = self.conn_id, "Shutdown observed");
                self.state = ConnState::Closing;
                return ExitReason::Shutdown;
            }

            self.state = match self.state {
                ConnState::Reading => self.on_read(),
                ConnState::Handling => self.on_handle(),
                ConnState::Writing { total } => self.on_write(total),
                ConnState::Closing => ConnState::Closing,
            };
        }

        ExitReason::Done
    }

    /// Release the socket and hand the slot buffer back.
    pub fn into_exit(self, reason: ExitReason) -> WorkerExit {
        let Worker {
            conn_id,
            stream,
            buffer,
            ..
        } = self;
        drop(stream);
        WorkerExit {
            conn_id,
            buffer,
            reason,
        }
    }

    fn on_read(&mut self) -> ConnState {
        match self.fill() {
            Status::Processed => ConnState::Handling,
            Status::Incomplete => ConnState::Reading,
            Status::Done => ConnState::Closing,
            Status::Unsupported => {
                warn!(
                    conn_id = self.conn_id,
                    buffered = self.filled,
                    "Packet exceeds slot buffer, discarding"
                );
                self.ctx.stats.record_unsupported();
                self.filled = 0;
                ConnState::Reading
            }
        }
    }

    /// Read whatever the peer has sent, appending to buffered bytes.
    fn fill(&mut self) -> Status {
        let filled = self.filled;
        let input = self.buffer.input_mut();
        if filled >= input.len() {
            return Status::Unsupported;
        }

        match self.stream.read(&mut input[filled..]) {
            Ok(0) => {
                trace!(conn_id = self.conn_id, "Connection closed by peer");
                Status::Done
            }
            Ok(n) => {
                self.filled += n;
                trace!(conn_id = self.conn_id, bytes = n, buffered = self.filled, "Read");
                Status::Processed
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Status::Incomplete
            }
            Err(e) => {
                warn!(conn_id = self.conn_id, error = %e, "Error reading socket");
                Status::Done
            }
        }
    }

    fn on_handle(&mut self) -> ConnState {
        let filled = self.filled;
        let (input, output) = self.buffer.split_mut();
        let result = self.ctx.handler.handle(&input[..filled], output);
        trace!(
            conn_id = self.conn_id,
            buffered = filled,
            status = %result.status(),
            "Handled"
        );

        match result {
            ProcessResult::Response {
                consumed,
                response_len,
            } => {
                self.ctx.stats.record_packet();
                self.consume(consumed);
                let total = response_len.min(self.buffer.output().len());
                if total == 0 {
                    self.after_packet()
                } else {
                    ConnState::Writing { total }
                }
            }
            ProcessResult::Processed { consumed: 0 } => ConnState::Reading,
            ProcessResult::Processed { consumed } => {
                self.ctx.stats.record_packet();
                self.consume(consumed);
                self.after_packet()
            }
            ProcessResult::Incomplete => ConnState::Reading,
            ProcessResult::Done => ConnState::Closing,
            ProcessResult::Unsupported { consumed } => {
                warn!(conn_id = self.conn_id, consumed, "Unsupported packet");
                debug!(
                    conn_id = self.conn_id,
                    packet = %hex_preview(&input[..filled]),
                    "Unsupported packet dump"
                );
                self.ctx.stats.record_unsupported();
                self.consume(consumed);
                self.after_packet()
            }
        }
    }

    fn on_write(&mut self, total: usize) -> ConnState {
        let response = &self.buffer.output()[..total];

        let result = match self.ctx.write_policy {
            WritePolicy::Once => match self.stream.write(response) {
                Ok(n) if n < total => Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {n} of {total} bytes"),
                )),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            },
            WritePolicy::All => self.stream.write_all(response),
        };

        match result.and_then(|()| self.stream.flush()) {
            Ok(()) => {
                trace!(conn_id = self.conn_id, bytes = total, "Wrote response");
                self.after_packet()
            }
            Err(e) => {
                warn!(conn_id = self.conn_id, error = %e, "Error writing response");
                ConnState::Closing
            }
        }
    }

    /// Drop the first `consumed` bytes of input; 0 drops everything.
    fn consume(&mut self, consumed: usize) {
        if consumed == 0 || consumed >= self.filled {
            self.filled = 0;
            return;
        }
        let filled = self.filled;
        self.buffer.input_mut().copy_within(consumed..filled, 0);
        self.filled -= consumed;
    }

    /// Pipelined bytes go straight back to the handler.
    fn after_packet(&self) -> ConnState {
        if self.filled > 0 {
            ConnState::Handling
        } else {
            ConnState::Reading
        }
    }
}

impl<S, H> Worker<S, H>
where
    S: Read + Write + Send + 'static,
    H: Handler,
{
    /// Run the worker on its own thread, reporting its exit on `exits`.
    ///
    /// A panicking handler is contained to this connection; the slot buffer
    /// is still returned.
    pub fn spawn(self, exits: Sender<WorkerExit>) -> io::Result<JoinHandle<()>> {
        let conn_id = self.conn_id;
        let mut worker = self;

        thread::Builder::new()
            .name(format!("conn-{conn_id}"))
            .spawn(move || {
                let reason = panic::catch_unwind(AssertUnwindSafe(|| worker.run()))
                    .unwrap_or_else(|_| {
                        error!(conn_id, "Handler panicked, closing connection");
                        ExitReason::Panicked
                    });
                debug!(conn_id, ?reason, "Worker exiting");
                // The accept loop only stops listening after joining us.
                let _ = exits.send(worker.into_exit(reason));
            })
    }
}

/// Hex dump of the start of a packet.
fn hex_preview(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(DUMP_PREVIEW * 3 + 8);
    for (i, b) in bytes.iter().take(DUMP_PREVIEW).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    if bytes.len() > DUMP_PREVIEW {
        let _ = write!(out, " .. ({} bytes)", bytes.len());
    }
    out
}
