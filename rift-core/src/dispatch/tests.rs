use super::{CommandRegistry, DispatchState};
use crate::command::{Command, CommandReply};
use googletest::prelude::*;
use rstest::rstest;

fn raw_args(parts: &[&[u8]]) -> Vec<Vec<u8>> {
    parts.iter().map(|part| part.to_vec()).collect()
}

fn reply_bytes(command: &Command, state: &mut DispatchState) -> Vec<u8> {
    let mut out = Vec::new();
    command.append_reply(state, &mut out);
    out
}

#[rstest]
fn unknown_command_becomes_error_command() {
    let registry = CommandRegistry::with_builtin_commands();
    let command = registry.parse(&raw_args(&[b"NOPE", b"x"]));

    assert_that!(command.is_error(), eq(true));
    assert_that!(command.is_worker(), eq(false));
    let mut state = DispatchState::new();
    assert_that!(
        reply_bytes(&command, &mut state).as_slice(),
        eq(&b"-ERR command 'NOPE' not found\r\n"[..])
    );
}

#[rstest]
fn arity_violation_becomes_error_command() {
    let registry = CommandRegistry::with_builtin_commands();
    let command = registry.parse(&raw_args(&[b"GET"]));

    assert_that!(command.is_error(), eq(true));
    let mut state = DispatchState::new();
    assert_that!(
        reply_bytes(&command, &mut state).as_slice(),
        eq(&b"-ERR wrong number of arguments for 'GET' command\r\n"[..])
    );
}

#[rstest]
fn lookup_is_case_insensitive() {
    let registry = CommandRegistry::with_builtin_commands();
    let command = registry.parse(&raw_args(&[b"ping"]));
    let mut state = DispatchState::new();
    assert_that!(
        reply_bytes(&command, &mut state).as_slice(),
        eq(&b"+PONG\r\n"[..])
    );
}

#[rstest]
#[case(&[b"KEYS".as_slice(), b"*".as_slice()], true)]
#[case(&[b"DEBUG".as_slice(), b"SLEEP".as_slice(), b"0".as_slice()], true)]
#[case(&[b"GET".as_slice(), b"k".as_slice()], false)]
#[case(&[b"SET".as_slice(), b"k".as_slice(), b"v".as_slice()], false)]
fn worker_classification_follows_command_table(
    #[case] parts: &[&[u8]],
    #[case] expected: bool,
) {
    let registry = CommandRegistry::with_builtin_commands();
    let command = registry.parse(&raw_args(parts));
    assert_that!(command.is_worker(), eq(expected));
}

#[rstest]
fn set_then_get_round_trips_value() {
    let registry = CommandRegistry::with_builtin_commands();
    let mut state = DispatchState::new();

    let set = registry.parse(&raw_args(&[b"SET", b"a", b"1"]));
    assert_that!(reply_bytes(&set, &mut state).as_slice(), eq(&b"+OK\r\n"[..]));

    let get = registry.parse(&raw_args(&[b"GET", b"a"]));
    assert_that!(
        reply_bytes(&get, &mut state).as_slice(),
        eq(&b"$1\r\n1\r\n"[..])
    );
}

#[rstest]
fn del_and_exists_count_keys() {
    let registry = CommandRegistry::with_builtin_commands();
    let mut state = DispatchState::new();
    state.set(b"a".to_vec(), b"1".to_vec());
    state.set(b"b".to_vec(), b"2".to_vec());

    let exists = registry.parse(&raw_args(&[b"EXISTS", b"a", b"b", b"c"]));
    assert_that!(
        reply_bytes(&exists, &mut state).as_slice(),
        eq(&b":2\r\n"[..])
    );

    let del = registry.parse(&raw_args(&[b"DEL", b"a", b"missing"]));
    assert_that!(reply_bytes(&del, &mut state).as_slice(), eq(&b":1\r\n"[..]));
    assert_that!(state.contains_key(b"a"), eq(false));
}

#[rstest]
fn incr_family_updates_counters() {
    let registry = CommandRegistry::with_builtin_commands();
    let mut state = DispatchState::new();

    let incr = registry.parse(&raw_args(&[b"INCR", b"n"]));
    assert_that!(reply_bytes(&incr, &mut state).as_slice(), eq(&b":1\r\n"[..]));

    let incrby = registry.parse(&raw_args(&[b"INCRBY", b"n", b"41"]));
    assert_that!(
        reply_bytes(&incrby, &mut state).as_slice(),
        eq(&b":42\r\n"[..])
    );
}

#[rstest]
fn incr_on_non_numeric_value_is_an_error_reply() {
    let registry = CommandRegistry::with_builtin_commands();
    let mut state = DispatchState::new();
    state.set(b"k".to_vec(), b"abc".to_vec());

    let incr = registry.parse(&raw_args(&[b"INCR", b"k"]));
    match incr {
        Command::Invoke { spec, frame } => {
            let reply = (spec.handler)(&frame, &mut state);
            assert_that!(
                &reply,
                eq(&CommandReply::Error(
                    "ERR value is not an integer or out of range".to_owned()
                ))
            );
        }
        Command::Error(_) | Command::Ok => panic!("INCR must resolve to a registered command"),
    }
}

#[rstest]
fn keys_scan_matches_glob_pattern() {
    let registry = CommandRegistry::with_builtin_commands();
    let mut state = DispatchState::new();
    state.set(b"user:1".to_vec(), b"a".to_vec());
    state.set(b"user:2".to_vec(), b"b".to_vec());
    state.set(b"other".to_vec(), b"c".to_vec());

    let keys = registry.parse(&raw_args(&[b"KEYS", b"user:*"]));
    let Command::Invoke { spec, frame } = keys else {
        panic!("KEYS must resolve to a registered command");
    };
    let CommandReply::Array(matches) = (spec.handler)(&frame, &mut state) else {
        panic!("KEYS must reply with an array");
    };
    assert_that!(matches.len(), eq(2_usize));
}
