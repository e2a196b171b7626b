//! Echo packet handler.

use super::parser::{self, Header, Parsed, MAX_HEADER_LEN};
use crate::runtime::{Handler, ProcessResult};

/// Echoes every complete packet back verbatim, header included.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, input: &[u8], output: &mut [u8]) -> ProcessResult {
        match parser::parse(input) {
            Parsed::Incomplete if input.len() >= MAX_HEADER_LEN => {
                // No line ending where one must be: garbage, drop it all.
                ProcessResult::Unsupported { consumed: 0 }
            }
            Parsed::Incomplete => ProcessResult::Incomplete,
            Parsed::Malformed { line_len } => ProcessResult::Unsupported { consumed: line_len },
            Parsed::Header(Header::Quit) => ProcessResult::Done,
            Parsed::Header(header) => {
                let total = match header.packet_len() {
                    Some(total) if total <= output.len() => total,
                    // Could never be buffered, let alone echoed.
                    _ => return ProcessResult::Unsupported { consumed: 0 },
                };

                if input.len() < total {
                    return ProcessResult::Incomplete;
                }

                output[..total].copy_from_slice(&input[..total]);
                ProcessResult::Response {
                    consumed: total,
                    response_len: total,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(input: &[u8]) -> (ProcessResult, Vec<u8>) {
        let mut output = vec![0u8; 64];
        let result = EchoHandler.handle(input, &mut output);
        (result, output)
    }

    #[test]
    fn test_echo_complete_packet() {
        let packet = b"16\r\n0123456789abcdef";
        let (result, output) = handle(packet);
        assert_eq!(
            result,
            ProcessResult::Response {
                consumed: 20,
                response_len: 20
            }
        );
        assert_eq!(&output[..20], packet);
    }

    #[test]
    fn test_partial_packet_incomplete() {
        let packet = b"16\r\n0123456789abcdef";
        assert_eq!(handle(&packet[..10]).0, ProcessResult::Incomplete);
        assert_eq!(handle(b"16").0, ProcessResult::Incomplete);
    }

    #[test]
    fn test_trailing_bytes_left_for_next_packet() {
        let (result, _) = handle(b"2\r\nhi5\r\nhel");
        assert_eq!(
            result,
            ProcessResult::Response {
                consumed: 5,
                response_len: 5
            }
        );
    }

    #[test]
    fn test_zero_length_packet() {
        let (result, output) = handle(b"0\r\n");
        assert_eq!(
            result,
            ProcessResult::Response {
                consumed: 3,
                response_len: 3
            }
        );
        assert_eq!(&output[..3], b"0\r\n");
    }

    #[test]
    fn test_bad_header_skipped() {
        assert_eq!(
            handle(b"xyz\r\n3\r\nabc").0,
            ProcessResult::Unsupported { consumed: 5 }
        );
        assert_eq!(
            handle(&[b'9'; MAX_HEADER_LEN]).0,
            ProcessResult::Unsupported { consumed: 0 }
        );
    }

    #[test]
    fn test_packet_larger_than_output() {
        assert_eq!(
            handle(b"1000\r\nabc").0,
            ProcessResult::Unsupported { consumed: 0 }
        );
        assert_eq!(
            handle(b"18446744073709551615\r\n").0,
            ProcessResult::Unsupported { consumed: 0 }
        );
        // Does not even fit a usize
        assert_eq!(
            handle(b"99999999999999999999\r\n").0,
            ProcessResult::Unsupported { consumed: 22 }
        );
    }

    #[test]
    fn test_quit() {
        assert_eq!(handle(b"QUIT\r\n").0, ProcessResult::Done);
    }
}
