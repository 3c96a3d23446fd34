use super::DispatchState;
use crate::command::{CommandFrame, CommandReply};

pub(super) fn handle_ping(frame: &CommandFrame, _state: &mut DispatchState) -> CommandReply {
    if frame.args.is_empty() {
        return CommandReply::SimpleString("PONG".to_owned());
    }
    if frame.args.len() == 1 {
        return CommandReply::BulkString(frame.args[0].clone());
    }
    CommandReply::Error("ERR wrong number of arguments for 'PING' command".to_owned())
}

pub(super) fn handle_echo(frame: &CommandFrame, _state: &mut DispatchState) -> CommandReply {
    CommandReply::BulkString(frame.args[0].clone())
}

pub(super) fn handle_get(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    state
        .get(&frame.args[0])
        .cloned()
        .map_or(CommandReply::Null, CommandReply::BulkString)
}

pub(super) fn handle_set(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    state.set(frame.args[0].clone(), frame.args[1].clone());
    CommandReply::SimpleString("OK".to_owned())
}

pub(super) fn handle_strlen(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    let length = state.get(&frame.args[0]).map_or(0, Vec::len);
    CommandReply::Integer(i64::try_from(length).unwrap_or(i64::MAX))
}

pub(super) fn handle_append(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    let key = frame.args[0].clone();
    let mut value = state.get(&key).cloned().unwrap_or_default();
    value.extend_from_slice(&frame.args[1]);
    let length = value.len();
    state.set(key, value);
    CommandReply::Integer(i64::try_from(length).unwrap_or(i64::MAX))
}
