//! Ping protocol parser.

/// Parsed ping command, borrowing from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Simple ping (no message).
    Ping,
    /// Ping carrying a message to send back.
    PingMsg(&'a [u8]),
    /// Quit command.
    Quit,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult<'a> {
    /// Command and the bytes its line occupies (\r\n included).
    Complete(Command<'a>, usize),
    /// No full line buffered yet.
    Incomplete,
    /// Unknown command; `consumed` covers the bad line.
    Error { consumed: usize },
}

/// Parse one ping protocol line from the front of the input buffer.
pub fn parse(input: &[u8]) -> ParseResult<'_> {
    let Some(line_end) = find_crlf(input) else {
        return ParseResult::Incomplete;
    };

    let line = &input[..line_end];
    let consumed = line_end + 2;

    let command = match line.split_first_chunk::<4>() {
        Some((verb, rest)) if verb.eq_ignore_ascii_case(b"PING") => match rest {
            [] => Some(Command::Ping),
            [b' ', msg @ ..] if !msg.is_empty() => Some(Command::PingMsg(msg)),
            _ => None,
        },
        Some((verb, [])) if verb.eq_ignore_ascii_case(b"QUIT") => Some(Command::Quit),
        _ => None,
    };

    match command {
        Some(command) => ParseResult::Complete(command, consumed),
        None => ParseResult::Error { consumed },
    }
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        assert!(matches!(
            parse(b"PING\r\n"),
            ParseResult::Complete(Command::Ping, 6)
        ));
        assert!(matches!(
            parse(b"ping\r\nPING\r\n"),
            ParseResult::Complete(Command::Ping, 6)
        ));
    }

    #[test]
    fn test_parse_ping_msg() {
        match parse(b"PING hello\r\n") {
            ParseResult::Complete(Command::PingMsg(msg), 12) => assert_eq!(msg, b"hello"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_quit() {
        assert!(matches!(
            parse(b"Quit\r\n"),
            ParseResult::Complete(Command::Quit, 6)
        ));
    }

    #[test]
    fn test_incomplete() {
        assert!(matches!(parse(b"PING"), ParseResult::Incomplete));
        assert!(matches!(parse(b""), ParseResult::Incomplete));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            parse(b"FOO\r\n"),
            ParseResult::Error { consumed: 5 }
        ));
        assert!(matches!(
            parse(b"PINGER\r\n"),
            ParseResult::Error { consumed: 8 }
        ));
        assert!(matches!(
            parse(b"PING \r\n"),
            ParseResult::Error { consumed: 7 }
        ));
    }
}
