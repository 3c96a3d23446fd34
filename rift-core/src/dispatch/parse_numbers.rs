/// Parses a RESP argument as a signed 64-bit integer using Redis error wording.
pub(super) fn parse_redis_i64(arg: &[u8]) -> Result<i64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| "ERR value is not an integer or out of range".to_owned())
}
