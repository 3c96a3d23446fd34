use super::parse_numbers::parse_redis_i64;
use super::DispatchState;
use crate::command::{CommandFrame, CommandReply};

/// `DEBUG SLEEP <ms>` blocks its executor for a deterministic duration, which is exactly why
/// the command is classified worker: it must never run on the reactor thread.
pub(super) fn handle_debug(frame: &CommandFrame, _state: &mut DispatchState) -> CommandReply {
    if !frame.args[0].eq_ignore_ascii_case(b"SLEEP") {
        return CommandReply::Error(format!(
            "ERR unknown DEBUG subcommand '{}'",
            String::from_utf8_lossy(&frame.args[0])
        ));
    }
    if frame.args.len() != 2 {
        return CommandReply::Error("ERR wrong number of arguments for 'DEBUG' command".to_owned());
    }
    match parse_redis_i64(&frame.args[1]) {
        Ok(milliseconds) if milliseconds >= 0 => {
            std::thread::sleep(std::time::Duration::from_millis(
                u64::try_from(milliseconds).unwrap_or(0),
            ));
            CommandReply::SimpleString("OK".to_owned())
        }
        Ok(_) => CommandReply::Error("ERR sleep duration must be non-negative".to_owned()),
        Err(message) => CommandReply::Error(message),
    }
}
