//! Incremental RESP request decoder.
//!
//! `parse_next_command` consumes at most one command from the front of `input` and reports the
//! unconsumed tail, so the caller can loop over pipelined requests and carry partial frames to
//! the next read. Arguments are appended into a caller-owned scratch vector to amortize
//! allocations across a pipeline.

use rift_common::error::{RiftError, RiftResult};

/// Upper bound on elements in one request array.
const MAX_MULTIBULK_ELEMENTS: usize = 1024 * 1024;
/// Upper bound on one bulk argument payload (512 MiB, RESP convention).
const MAX_BULK_BYTES: usize = 512 * 1024 * 1024;

/// Outcome of one decoding step.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// One full command was consumed.
    Complete {
        /// Exact wire bytes of the consumed command.
        packet: &'a [u8],
        /// Bytes remaining after the command.
        tail: &'a [u8],
    },
    /// More bytes are required before a command can be produced.
    Incomplete,
}

/// Decodes the next command from `input`, filling `args` with its arguments.
///
/// `args` is cleared first; reusing the same vector across calls avoids re-allocating argument
/// buffers for pipelined traffic. Both `*N` array frames and newline-delimited inline commands
/// are accepted.
///
/// # Errors
///
/// Returns `RiftError::Protocol` when the frame violates RESP framing. Protocol errors are not
/// recoverable on the same byte stream.
pub fn parse_next_command<'a>(
    input: &'a [u8],
    args: &mut Vec<Vec<u8>>,
) -> RiftResult<Parsed<'a>> {
    args.clear();
    if input.is_empty() {
        return Ok(Parsed::Incomplete);
    }
    if input[0] == b'*' {
        parse_multibulk(input, args)
    } else {
        parse_inline(input, args)
    }
}

fn parse_multibulk<'a>(input: &'a [u8], args: &mut Vec<Vec<u8>>) -> RiftResult<Parsed<'a>> {
    let Some((element_count, mut cursor)) = parse_length_line(&input[1..], 1)? else {
        return Ok(Parsed::Incomplete);
    };
    if element_count > MAX_MULTIBULK_ELEMENTS {
        return Err(protocol_error("invalid multibulk length"));
    }

    for _ in 0..element_count {
        if cursor >= input.len() {
            args.clear();
            return Ok(Parsed::Incomplete);
        }
        if input[cursor] != b'$' {
            return Err(protocol_error("expected '$'"));
        }
        let Some((bulk_len, data_start)) = parse_length_line(&input[cursor + 1..], cursor + 1)?
        else {
            args.clear();
            return Ok(Parsed::Incomplete);
        };
        if bulk_len > MAX_BULK_BYTES {
            return Err(protocol_error("invalid bulk length"));
        }

        let data_end = data_start + bulk_len;
        if input.len() < data_end + 2 {
            args.clear();
            return Ok(Parsed::Incomplete);
        }
        if &input[data_end..data_end + 2] != b"\r\n" {
            return Err(protocol_error("expected CRLF after bulk payload"));
        }
        args.push(input[data_start..data_end].to_vec());
        cursor = data_end + 2;
    }

    Ok(Parsed::Complete {
        packet: &input[..cursor],
        tail: &input[cursor..],
    })
}

/// Parses `<digits>\r\n` starting at `slice`, returning the value and the absolute offset of
/// the byte after the line terminator. `base` is the absolute offset `slice` starts at.
fn parse_length_line(slice: &[u8], base: usize) -> RiftResult<Option<(usize, usize)>> {
    let Some(line_end) = slice.iter().position(|&byte| byte == b'\n') else {
        return Ok(None);
    };
    if line_end == 0 || slice[line_end - 1] != b'\r' {
        return Err(protocol_error("expected CRLF"));
    }
    let digits = &slice[..line_end - 1];
    if digits.is_empty() || digits.iter().any(|byte| !byte.is_ascii_digit()) {
        return Err(protocol_error("invalid length"));
    }
    let mut value = 0_usize;
    for &byte in digits {
        value = value
            .checked_mul(10)
            .and_then(|scaled| scaled.checked_add(usize::from(byte - b'0')))
            .ok_or_else(|| protocol_error("invalid length"))?;
    }
    Ok(Some((value, base + line_end + 1)))
}

fn parse_inline<'a>(input: &'a [u8], args: &mut Vec<Vec<u8>>) -> RiftResult<Parsed<'a>> {
    let Some(line_end) = input.iter().position(|&byte| byte == b'\n') else {
        return Ok(Parsed::Incomplete);
    };
    let mut line = &input[..line_end];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }

    for word in line.split(|&byte| byte == b' ') {
        if !word.is_empty() {
            args.push(word.to_vec());
        }
    }

    Ok(Parsed::Complete {
        packet: &input[..line_end + 1],
        tail: &input[line_end + 1..],
    })
}

fn protocol_error(message: &str) -> RiftError {
    RiftError::Protocol(message.to_owned())
}

#[cfg(test)]
mod tests {
    use super::{parse_next_command, Parsed};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn multibulk_command_parses_with_tail() {
        let mut args = Vec::new();
        let input = b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*1\r\n$4\r\nPING\r\n";
        let parsed = parse_next_command(input, &mut args).expect("frame must parse");

        let Parsed::Complete { packet, tail } = parsed else {
            panic!("frame must be complete");
        };
        assert_that!(packet, eq(&b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n"[..]));
        assert_that!(tail, eq(&b"*1\r\n$4\r\nPING\r\n"[..]));
        assert_that!(&args, eq(&vec![b"GET".to_vec(), b"a".to_vec()]));
    }

    #[rstest]
    #[case(b"*2\r\n$3\r\nGET\r\n".as_slice())]
    #[case(b"*2\r\n$3\r\nGET\r\n$5\r\nab".as_slice())]
    #[case(b"*2\r\n".as_slice())]
    #[case(b"*".as_slice())]
    fn partial_frames_report_incomplete(#[case] input: &[u8]) {
        let mut args = Vec::new();
        let parsed = parse_next_command(input, &mut args).expect("partial frame is not an error");
        assert_that!(parsed, eq(&Parsed::Incomplete));
    }

    #[rstest]
    fn inline_command_parses_words() {
        let mut args = Vec::new();
        let parsed =
            parse_next_command(b"set  key value\r\nrest", &mut args).expect("line must parse");

        let Parsed::Complete { tail, .. } = parsed else {
            panic!("inline line must be complete");
        };
        assert_that!(tail, eq(&b"rest"[..]));
        assert_that!(
            &args,
            eq(&vec![b"set".to_vec(), b"key".to_vec(), b"value".to_vec()])
        );
    }

    #[rstest]
    fn empty_inline_line_yields_no_args() {
        let mut args = Vec::new();
        let parsed = parse_next_command(b"\r\n", &mut args).expect("empty line must parse");
        assert_that!(matches!(parsed, Parsed::Complete { .. }), eq(true));
        assert_that!(args.is_empty(), eq(true));
    }

    #[rstest]
    #[case(b"*A\r\n".as_slice())]
    #[case(b"*1\r\n$x\r\nP\r\n".as_slice())]
    #[case(b"*1\r\nPING\r\n".as_slice())]
    #[case(b"*1\r\n$4\r\nPINGxx".as_slice())]
    fn malformed_frames_are_protocol_errors(#[case] input: &[u8]) {
        let mut args = Vec::new();
        assert_that!(parse_next_command(input, &mut args).is_err(), eq(true));
    }

    #[rstest]
    fn multibulk_canonical_form_round_trips() {
        let render = |args: &[Vec<u8>]| {
            let mut wire = format!("*{}\r\n", args.len()).into_bytes();
            for arg in args {
                wire.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
                wire.extend_from_slice(arg);
                wire.extend_from_slice(b"\r\n");
            }
            wire
        };
        let original = render(&[b"SET".to_vec(), b"a key".to_vec(), Vec::new()]);

        let mut args = Vec::new();
        let parsed = parse_next_command(&original, &mut args).expect("frame must parse");
        assert_that!(matches!(parsed, Parsed::Complete { .. }), eq(true));
        assert_that!(&render(&args), eq(&original));
    }

    #[rstest]
    fn scratch_vector_is_cleared_between_calls() {
        let mut args = Vec::new();
        let _ = parse_next_command(b"*1\r\n$4\r\nPING\r\n", &mut args).expect("must parse");
        let _ = parse_next_command(b"*1\r\n$4\r\nECHO\r\n", &mut args).expect("must parse");
        assert_that!(&args, eq(&vec![b"ECHO".to_vec()]));
    }
}
