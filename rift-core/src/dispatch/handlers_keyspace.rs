use super::DispatchState;
use crate::command::{CommandFrame, CommandReply};

pub(super) fn handle_del(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    let mut removed = 0_i64;
    for key in &frame.args {
        if state.remove(key) {
            removed += 1;
        }
    }
    CommandReply::Integer(removed)
}

pub(super) fn handle_exists(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    let mut present = 0_i64;
    for key in &frame.args {
        if state.contains_key(key) {
            present += 1;
        }
    }
    CommandReply::Integer(present)
}

pub(super) fn handle_dbsize(_frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    CommandReply::Integer(i64::try_from(state.key_count()).unwrap_or(i64::MAX))
}

pub(super) fn handle_flushall(_frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    state.clear_all();
    CommandReply::SimpleString("OK".to_owned())
}

/// Full-keyspace scan; classified as a worker command because its cost grows with the
/// keyspace rather than the request.
pub(super) fn handle_keys(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    let pattern = &frame.args[0];
    let mut matches = Vec::new();
    for key in state.iter_keys() {
        if glob_match(pattern, key) {
            matches.push(CommandReply::BulkString(key.clone()));
        }
    }
    CommandReply::Array(matches)
}

/// Minimal glob matcher supporting `*` and `?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text)
                || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(expected), Some(actual)) if expected == actual => {
            glob_match(&pattern[1..], &text[1..])
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::glob_match;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"*".as_slice(), b"anything".as_slice(), true)]
    #[case(b"user:*".as_slice(), b"user:42".as_slice(), true)]
    #[case(b"user:?".as_slice(), b"user:42".as_slice(), false)]
    #[case(b"user:??".as_slice(), b"user:42".as_slice(), true)]
    #[case(b"a*c".as_slice(), b"abbbc".as_slice(), true)]
    #[case(b"a*c".as_slice(), b"abbb".as_slice(), false)]
    #[case(b"".as_slice(), b"".as_slice(), true)]
    fn glob_patterns_match_expected_keys(
        #[case] pattern: &[u8],
        #[case] text: &[u8],
        #[case] expected: bool,
    ) {
        assert_that!(glob_match(pattern, text), eq(expected));
    }
}
