//! Echo protocol parser.
//!
//! Only the length line is parsed here; the payload is opaque and is
//! copied back by the handler once it is fully buffered.

/// Longest length line accepted before the header is declared malformed.
pub const MAX_HEADER_LEN: usize = 22; // 20 digits + \r\n

/// Decoded length line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// A packet of `data_len` payload bytes follows `header_len` header bytes.
    Packet { data_len: usize, header_len: usize },
    /// `QUIT` line.
    Quit,
}

impl Header {
    /// Total packet size, header included. `None` for `Quit` or when the
    /// size does not fit in memory at all.
    pub fn packet_len(&self) -> Option<usize> {
        match *self {
            Header::Packet {
                data_len,
                header_len,
            } => header_len.checked_add(data_len),
            Header::Quit => None,
        }
    }
}

/// Outcome of parsing the front of the input.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    Header(Header),
    /// No line ending yet.
    Incomplete,
    /// Length line is not a decimal number; `line_len` includes the \r\n.
    Malformed { line_len: usize },
}

/// Parse the length line at the front of `input`.
pub fn parse(input: &[u8]) -> Parsed {
    let Some(cr) = input.windows(2).position(|w| w == b"\r\n") else {
        return Parsed::Incomplete;
    };
    let line = &input[..cr];
    let header_len = cr + 2;

    if line.eq_ignore_ascii_case(b"QUIT") {
        return Parsed::Header(Header::Quit);
    }

    match decimal(line) {
        Some(data_len) => Parsed::Header(Header::Packet {
            data_len,
            header_len,
        }),
        None => Parsed::Malformed {
            line_len: header_len,
        },
    }
}

/// Plain ASCII digits only: no sign, no whitespace, no overflow.
fn decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0usize, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(usize::from(b - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_line() {
        assert_eq!(
            parse(b"100\r\n"),
            Parsed::Header(Header::Packet {
                data_len: 100,
                header_len: 5
            })
        );
        // payload bytes after the header are not looked at
        assert_eq!(
            parse(b"3\r\n\r\n\r"),
            Parsed::Header(Header::Packet {
                data_len: 3,
                header_len: 3
            })
        );
    }

    #[test]
    fn test_packet_len() {
        let header = Header::Packet {
            data_len: 16,
            header_len: 4,
        };
        assert_eq!(header.packet_len(), Some(20));
        assert_eq!(Header::Quit.packet_len(), None);

        let huge = Header::Packet {
            data_len: usize::MAX,
            header_len: 22,
        };
        assert_eq!(huge.packet_len(), None);
    }

    #[test]
    fn test_quit_any_case() {
        assert_eq!(parse(b"quit\r\n"), Parsed::Header(Header::Quit));
        assert_eq!(parse(b"QUIT\r\n"), Parsed::Header(Header::Quit));
    }

    #[test]
    fn test_needs_line_ending() {
        assert_eq!(parse(b"100"), Parsed::Incomplete);
        assert_eq!(parse(b"100\r"), Parsed::Incomplete);
        assert_eq!(parse(b""), Parsed::Incomplete);
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(parse(b"abc\r\nrest"), Parsed::Malformed { line_len: 5 });
        assert_eq!(parse(b"+5\r\n"), Parsed::Malformed { line_len: 4 });
        assert_eq!(parse(b" 5\r\n"), Parsed::Malformed { line_len: 4 });
        assert_eq!(parse(b"\r\n"), Parsed::Malformed { line_len: 2 });
        assert_eq!(
            parse(b"99999999999999999999\r\n"),
            Parsed::Malformed { line_len: 22 }
        );
    }
}
