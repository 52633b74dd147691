use std::time::Duration;

/// Client-wide defaults. Sessions inherit the timeouts; requests inherit
/// whatever their session carries at open time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connect timeout in milliseconds; 0 leaves it to the transport.
    pub connect_timeout_ms: u32,
    /// Whole-transfer timeout in milliseconds; 0 disables it.
    pub receive_timeout_ms: u32,
    /// Engine I/O staging buffer, also the upload pull granularity.
    pub io_buffer: usize,
    /// Redirect-following cap forwarded to the engine.
    pub max_redirects: u32,
    /// Sleep used by blocking calls that poll request state.
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            receive_timeout_ms: 15_000,
            io_buffer: 16 * 1024,
            max_redirects: 30,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl Config {
    /// Defaults overridable through `WICKET_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_u32("WICKET_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = env_u32("WICKET_RECEIVE_TIMEOUT_MS") {
            config.receive_timeout_ms = v;
        }
        if let Some(v) = env_u32("WICKET_IO_BUFFER") {
            config.io_buffer = v as usize;
        }
        if let Some(v) = env_u32("WICKET_MAX_REDIRECTS") {
            config.max_redirects = v;
        }
        config
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.receive_timeout_ms, 15_000);
        assert_eq!(c.io_buffer, 16 * 1024);
        assert_eq!(c.max_redirects, 30);
    }
}
