//! RESP reply encoders.
//!
//! Every encoder appends into a caller-owned buffer. The connection processor builds one output
//! buffer per `on_data` pass (or per worker execution), so append-style encoding avoids an
//! intermediate allocation per reply.

/// Appends `+OK\r\n`.
pub fn append_ok(out: &mut Vec<u8>) {
    out.extend_from_slice(b"+OK\r\n");
}

/// Appends `+QUEUED\r\n`, the MULTI accumulation acknowledgement.
pub fn append_queued(out: &mut Vec<u8>) {
    out.extend_from_slice(b"+QUEUED\r\n");
}

/// Appends a simple string reply `+<value>\r\n`.
pub fn append_simple(out: &mut Vec<u8>, value: &str) {
    out.push(b'+');
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Appends an error reply `-<message>\r\n`.
pub fn append_error(out: &mut Vec<u8>, message: &str) {
    out.push(b'-');
    out.extend_from_slice(message.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Appends an integer reply `:<value>\r\n`.
pub fn append_integer(out: &mut Vec<u8>, value: i64) {
    out.push(b':');
    out.extend_from_slice(value.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Appends a bulk string reply `$<len>\r\n<data>\r\n`.
pub fn append_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Appends the null bulk string `$-1\r\n`.
pub fn append_null(out: &mut Vec<u8>) {
    out.extend_from_slice(b"$-1\r\n");
}

/// Appends an array header `*<len>\r\n`; the caller appends the elements.
pub fn append_array(out: &mut Vec<u8>, len: usize) {
    out.push(b'*');
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Appends the null array `*-1\r\n`.
pub fn append_null_array(out: &mut Vec<u8>) {
    out.extend_from_slice(b"*-1\r\n");
}

#[cfg(test)]
mod tests {
    use super::{append_array, append_bulk, append_error, append_integer, append_ok};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn encoders_append_instead_of_replacing() {
        let mut out = Vec::new();
        append_ok(&mut out);
        append_integer(&mut out, -7);
        append_bulk(&mut out, b"ab");
        assert_that!(out.as_slice(), eq(&b"+OK\r\n:-7\r\n$2\r\nab\r\n"[..]));
    }

    #[rstest]
    fn error_reply_carries_message_verbatim() {
        let mut out = Vec::new();
        append_error(&mut out, "ERR discard not expected");
        assert_that!(out.as_slice(), eq(&b"-ERR discard not expected\r\n"[..]));
    }

    #[rstest]
    fn array_header_prefixes_elements() {
        let mut out = Vec::new();
        append_array(&mut out, 2);
        append_ok(&mut out);
        append_bulk(&mut out, b"1");
        assert_that!(out.as_slice(), eq(&b"*2\r\n+OK\r\n$1\r\n1\r\n"[..]));
    }
}
