use super::parse_numbers::parse_redis_i64;
use super::DispatchState;
use crate::command::{CommandFrame, CommandReply};

pub(super) fn handle_incr(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    apply_delta(&frame.args[0], 1, state)
}

pub(super) fn handle_incrby(frame: &CommandFrame, state: &mut DispatchState) -> CommandReply {
    match parse_redis_i64(&frame.args[1]) {
        Ok(delta) => apply_delta(&frame.args[0], delta, state),
        Err(message) => CommandReply::Error(message),
    }
}

fn apply_delta(key: &[u8], delta: i64, state: &mut DispatchState) -> CommandReply {
    let current = match state.get(key) {
        Some(value) => match parse_redis_i64(value) {
            Ok(current) => current,
            Err(message) => return CommandReply::Error(message),
        },
        None => 0,
    };
    let Some(updated) = current.checked_add(delta) else {
        return CommandReply::Error("ERR increment or decrement would overflow".to_owned());
    };
    state.set(key.to_vec(), updated.to_string().into_bytes());
    CommandReply::Integer(updated)
}
