//! Sender configuration: defaults, TOML file, `CAMPUSH_*` environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable prefix, e.g. `CAMPUSH_OUTPUT__WIDTH=320`.
pub const ENV_PREFIX: &str = "CAMPUSH";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub capture: CaptureConfig,
    pub output: OutputConfig,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Collector address as `host:port`
    pub server_address: String,
    pub identity: String,
    /// Outbound messages buffered before `send` blocks
    pub queue_depth: usize,
    /// Unset means `send` blocks for as long as the queue is full
    pub send_timeout_ms: Option<u64>,
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device indices probed, starting at 0
    pub max_probe_attempts: u32,
    pub buffer_count: u32,
    pub read_retries: u32,
    pub retry_backoff_ms: u64,
    /// Longest wait for one frame before the stop flag is checked again.
    /// Zero blocks until the device delivers.
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub flip: bool,
    pub jpeg_quality: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            identity: String::new(),
            queue_depth: 1000,
            send_timeout_ms: None,
            reconnect_interval_ms: 100,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_probe_attempts: 5,
            buffer_count: 4,
            read_retries: 2,
            retry_backoff_ms: 50,
            read_timeout_ms: 1000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            flip: false,
            jpeg_quality: 95,
        }
    }
}

impl Config {
    /// Layer an optional TOML file and the environment over the defaults.
    ///
    /// The result is not validated; callers apply their own overrides first
    /// and then call [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.endpoint()?;
        if self.transport.identity.is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        if !self.transport.identity.is_ascii() {
            return Err(ConfigError::NonAsciiIdentity(self.transport.identity.clone()));
        }
        if self.transport.queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }

        let OutputConfig {
            width,
            height,
            jpeg_quality,
            ..
        } = self.output;
        let in_range = |v: u32| (1..=u16::MAX as u32).contains(&v);
        if !in_range(width) || !in_range(height) {
            return Err(ConfigError::InvalidResolution { width, height });
        }
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::InvalidQuality(jpeg_quality));
        }

        if self.capture.max_probe_attempts == 0 {
            return Err(ConfigError::ZeroProbeAttempts);
        }

        Ok(())
    }
}

impl TransportConfig {
    /// The `tcp://host:port` endpoint for `server_address`.
    pub fn endpoint(&self) -> Result<String, ConfigError> {
        if self.server_address.is_empty() {
            return Err(ConfigError::MissingServerAddress);
        }
        parse_endpoint(&self.server_address)
            .ok_or_else(|| ConfigError::InvalidServerAddress(self.server_address.clone()))
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl CaptureConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

/// Accepts `host:port` or `tcp://host:port`; IPv6 hosts must be bracketed.
fn parse_endpoint(address: &str) -> Option<String> {
    let address = address.strip_prefix("tcp://").unwrap_or(address);
    let (host, port) = address.rsplit_once(':')?;

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.is_empty() || bare.contains(char::is_whitespace) {
        return None;
    }
    if bare.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return None;
    }
    port.parse::<u16>().ok().filter(|&p| p != 0)?;

    Some(format!("tcp://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.transport.server_address = "127.0.0.1:5555".into();
        config.transport.identity = "cam1".into();
        config
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!((config.output.width, config.output.height), (640, 480));
        assert_eq!(config.capture.max_probe_attempts, 5);
        assert_eq!(config.transport.queue_depth, 1000);
        assert_eq!(config.transport.send_timeout(), None);
        assert_eq!(config.capture.read_timeout(), Some(Duration::from_secs(1)));
        assert!(!config.output.flip);
    }

    #[test]
    fn zero_read_timeout_blocks() {
        let capture = CaptureConfig {
            read_timeout_ms: 0,
            ..CaptureConfig::default()
        };
        assert_eq!(capture.read_timeout(), None);
    }

    #[test]
    fn endpoint_forms() {
        let ok = |s: &str| parse_endpoint(s);
        assert_eq!(ok("localhost:5555").as_deref(), Some("tcp://localhost:5555"));
        assert_eq!(ok("tcp://10.0.0.2:7000").as_deref(), Some("tcp://10.0.0.2:7000"));
        assert_eq!(ok("[::1]:5555").as_deref(), Some("tcp://[::1]:5555"));
        assert_eq!(ok("localhost"), None);
        assert_eq!(ok(":5555"), None);
        assert_eq!(ok("host:0"), None);
        assert_eq!(ok("host:99999"), None);
        assert_eq!(ok("::1:5555"), None);
    }

    #[test]
    fn validation() {
        assert!(valid().validate().is_ok());

        let mut c = valid();
        c.transport.server_address.clear();
        assert!(matches!(c.validate(), Err(ConfigError::MissingServerAddress)));

        let mut c = valid();
        c.transport.identity.clear();
        assert!(matches!(c.validate(), Err(ConfigError::EmptyIdentity)));

        let mut c = valid();
        c.transport.identity = "kamera-ü".into();
        assert!(matches!(c.validate(), Err(ConfigError::NonAsciiIdentity(_))));

        let mut c = valid();
        c.output.height = 0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidResolution { width: 640, height: 0 })
        ));

        let mut c = valid();
        c.output.jpeg_quality = 101;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidQuality(101))));

        let mut c = valid();
        c.capture.max_probe_attempts = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroProbeAttempts)));

        let mut c = valid();
        c.transport.queue_depth = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ZeroQueueDepth)));
    }
}
