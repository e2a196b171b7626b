//! Handler contract between connection workers and packet codecs.
//!
//! Handlers are synchronous and work on raw byte buffers: they look at the
//! bytes buffered so far, and either produce a response, ask for more data,
//! or report a status that drives the worker's state machine.

use std::fmt;

/// Status codes shared by the socket read step and handler results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A packet (or new data) is ready.
    Processed,
    /// More bytes are needed before anything can be done.
    Incomplete,
    /// The connection is finished.
    Done,
    /// The packet is malformed and was skipped.
    Unsupported,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Processed => "processed",
            Status::Incomplete => "incomplete",
            Status::Done => "done",
            Status::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Result of handing a buffer to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Packet handled, `response_len` bytes written at the start of the
    /// output buffer. A `consumed` of 0 consumes the whole input.
    Response {
        consumed: usize,
        response_len: usize,
    },
    /// Packet handled, nothing to send back. Unlike the other variants, a
    /// `consumed` of 0 consumes nothing: the input stays buffered and the
    /// worker waits for more bytes.
    Processed { consumed: usize },
    /// Need more data to complete the packet.
    Incomplete,
    /// Close the connection.
    Done,
    /// Malformed packet; skip `consumed` bytes (0 discards all input).
    Unsupported { consumed: usize },
}

impl ProcessResult {
    /// Collapse the result to its status code.
    pub fn status(&self) -> Status {
        match self {
            ProcessResult::Response { .. } | ProcessResult::Processed { .. } => Status::Processed,
            ProcessResult::Incomplete => Status::Incomplete,
            ProcessResult::Done => Status::Done,
            ProcessResult::Unsupported { .. } => Status::Unsupported,
        }
    }
}

/// Packet handler invoked by every connection worker.
///
/// One instance is shared by all workers, so it is the place to keep any
/// context the protocol needs; interior state must be synchronised by the
/// implementor. Buffers are only borrowed for the duration of the call.
///
/// `consumed` counts bytes from the front of `input`. For `Response` and
/// `Unsupported` a value of 0 means all of `input`; for `Processed` it means
/// none of it. Bytes left over after a packet are handed straight back on
/// the next call, before the socket is read again.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, input: &[u8], output: &mut [u8]) -> ProcessResult;
}

impl<F> Handler for F
where
    F: Fn(&[u8], &mut [u8]) -> ProcessResult + Send + Sync + 'static,
{
    fn handle(&self, input: &[u8], output: &mut [u8]) -> ProcessResult {
        self(input, output)
    }
}

/// Copy a response into the output buffer, truncating if it does not fit.
pub fn copy_response(response: &[u8], output: &mut [u8]) -> usize {
    let len = response.len().min(output.len());
    output[..len].copy_from_slice(&response[..len]);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_results() {
        let response = ProcessResult::Response {
            consumed: 4,
            response_len: 2,
        };
        assert_eq!(response.status(), Status::Processed);
        assert_eq!(
            ProcessResult::Processed { consumed: 1 }.status(),
            Status::Processed
        );
        assert_eq!(ProcessResult::Incomplete.status(), Status::Incomplete);
        assert_eq!(ProcessResult::Done.status(), Status::Done);
        assert_eq!(
            ProcessResult::Unsupported { consumed: 0 }.status(),
            Status::Unsupported
        );
        assert_eq!(Status::Unsupported.to_string(), "unsupported");
    }

    #[test]
    fn test_closure_handler() {
        let handler = |input: &[u8], output: &mut [u8]| ProcessResult::Response {
            consumed: input.len(),
            response_len: copy_response(input, output),
        };

        let mut out = [0u8; 8];
        let result = handler.handle(b"abc", &mut out);
        assert_eq!(
            result,
            ProcessResult::Response {
                consumed: 3,
                response_len: 3
            }
        );
        assert_eq!(&out[..3], b"abc");
    }

    #[test]
    fn test_copy_response_truncates() {
        let mut out = [0u8; 4];
        assert_eq!(copy_response(b"PONG\r\n", &mut out), 4);
        assert_eq!(&out, b"PONG");
    }
}
