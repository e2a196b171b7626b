//! Ping packet handler.

use super::parser::{self, Command, ParseResult};
use crate::runtime::{Handler, ProcessResult};
use bytes::BufMut;

const PONG: &[u8] = b"PONG";

/// Answers `PING` lines with `PONG`, echoing an optional message.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingHandler;

impl Handler for PingHandler {
    fn handle(&self, input: &[u8], output: &mut [u8]) -> ProcessResult {
        let (command, consumed) = match parser::parse(input) {
            ParseResult::Complete(command, consumed) => (command, consumed),
            ParseResult::Incomplete => return ProcessResult::Incomplete,
            ParseResult::Error { consumed } => return ProcessResult::Unsupported { consumed },
        };

        let msg = match command {
            Command::Quit => return ProcessResult::Done,
            Command::Ping => None,
            Command::PingMsg(msg) => Some(msg),
        };

        match write_pong(msg, output) {
            Some(response_len) => ProcessResult::Response {
                consumed,
                response_len,
            },
            None => ProcessResult::Unsupported { consumed },
        }
    }
}

/// Write `PONG[ msg]\r\n`, or `None` if it does not fit.
fn write_pong(msg: Option<&[u8]>, output: &mut [u8]) -> Option<usize> {
    let needed = PONG.len() + msg.map_or(0, |m| m.len() + 1) + 2;
    if output.len() < needed {
        return None;
    }

    let mut out = &mut output[..];
    out.put_slice(PONG);
    if let Some(msg) = msg {
        out.put_u8(b' ');
        out.put_slice(msg);
    }
    out.put_slice(b"\r\n");
    Some(needed)
}
