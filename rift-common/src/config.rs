//! Process-wide tunables consumed at startup.

/// Startup settings for the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// TCP port the RESP listener binds.
    pub resp_port: u16,
    /// Maximum command groups a single connection may have awaiting execution before the
    /// reactor stops consuming its input bytes.
    pub max_command_backlog: usize,
    /// Readiness event capacity of one reactor poll cycle.
    pub max_events: usize,
    /// Connection write buffer size above which socket reads pause.
    pub write_high_watermark_bytes: usize,
    /// Connection write buffer size below which paused reads resume.
    pub write_low_watermark_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resp_port: 6379,
            max_command_backlog: 10_000,
            max_events: 1024,
            write_high_watermark_bytes: 256 * 1024,
            write_low_watermark_bytes: 128 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Returns validated backpressure watermarks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the low watermark is not below the high watermark.
    pub fn normalized_watermarks(&self) -> crate::error::RiftResult<(usize, usize)> {
        if self.write_low_watermark_bytes >= self.write_high_watermark_bytes {
            return Err(crate::error::RiftError::InvalidConfig(
                "write low watermark must be below high watermark",
            ));
        }
        Ok((
            self.write_high_watermark_bytes,
            self.write_low_watermark_bytes,
        ))
    }

    /// Returns the backlog cap, normalizing zero to one so a connection can always hold the
    /// group it is currently assembling.
    #[must_use]
    pub fn normalized_backlog_cap(&self) -> usize {
        self.max_command_backlog.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeConfig;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn default_config_has_valid_watermarks() {
        let config = RuntimeConfig::default();
        let (high, low) = config
            .normalized_watermarks()
            .expect("default watermarks must validate");
        assert_that!(low < high, eq(true));
    }

    #[rstest]
    fn inverted_watermarks_are_rejected() {
        let config = RuntimeConfig {
            write_high_watermark_bytes: 16,
            write_low_watermark_bytes: 64,
            ..RuntimeConfig::default()
        };
        assert_that!(config.normalized_watermarks().is_err(), eq(true));
    }

    #[rstest]
    fn zero_backlog_cap_is_normalized_to_one() {
        let config = RuntimeConfig {
            max_command_backlog: 0,
            ..RuntimeConfig::default()
        };
        assert_that!(config.normalized_backlog_cap(), eq(1_usize));
    }
}
