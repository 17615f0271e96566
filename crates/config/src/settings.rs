//! Server settings
//!
//! All sections are optional with working defaults: stream on 1704,
//! control on 1705, 48 kHz stereo PCM from a named FIFO read every 20 ms,
//! one second of end-to-end buffering.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use chorus_protocol::SampleFormat;

use crate::error::{ConfigError, Result};

/// Codec names the pipe reader can produce headers for
const KNOWN_CODECS: &[&str] = &["pcm"];

/// Main settings structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Stream server (playback clients)
    pub stream: StreamConfig,

    /// Control server (JSON-RPC peers)
    pub control: ControlConfig,

    /// Audio source (FIFO producer)
    pub source: SourceConfig,

    /// Persistent state locations
    pub state: StateConfig,

    /// Logging configuration
    pub log: LogConfig,
}

/// Stream server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// TCP port playback clients connect to
    pub port: u16,

    /// Whole-pipeline target buffering in milliseconds
    ///
    /// Also the upper bound for per-client latency trims.
    pub buffer_ms: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: 1704,
            buffer_ms: 1000,
        }
    }
}

/// Control server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// TCP port control peers connect to
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { port: 1705 }
    }
}

/// Audio source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Path of the FIFO carrying raw PCM
    pub fifo: PathBuf,

    /// Codec name, e.g. "pcm"
    pub codec: String,

    /// Sample format as "rate:bits:channels"
    pub sample_format: String,

    /// How often the FIFO is read; also the chunk duration
    pub read_interval_ms: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fifo: PathBuf::from("/tmp/chorus_fifo"),
            codec: "pcm".into(),
            sample_format: "48000:16:2".into(),
            read_interval_ms: 20,
        }
    }
}

/// Persistent state configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Where the client registry is persisted
    pub clients_file: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            clients_file: PathBuf::from("clients.json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        Self::from_str(&contents)
    }

    /// The parsed sample format
    pub fn sample_format(&self) -> Result<SampleFormat> {
        self.source
            .sample_format
            .parse()
            .map_err(|e| ConfigError::invalid_value("source.sample_format", format!("{e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.stream.buffer_ms == 0 {
            return Err(ConfigError::invalid_value(
                "stream.buffer_ms",
                "must be greater than zero",
            ));
        }
        if self.source.read_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "source.read_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.source.read_interval_ms > self.stream.buffer_ms {
            return Err(ConfigError::invalid_value(
                "source.read_interval_ms",
                format!(
                    "chunk duration {} ms exceeds buffer_ms {}",
                    self.source.read_interval_ms, self.stream.buffer_ms
                ),
            ));
        }
        if self.stream.port == self.control.port {
            return Err(ConfigError::invalid_value(
                "control.port",
                format!("conflicts with stream.port {}", self.stream.port),
            ));
        }
        if !KNOWN_CODECS.contains(&self.source.codec.as_str()) {
            return Err(ConfigError::invalid_value(
                "source.codec",
                format!("unknown codec '{}'", self.source.codec),
            ));
        }
        self.sample_format()?;
        Ok(())
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = Settings::from_str("").unwrap();
        assert_eq!(settings.stream.port, 1704);
        assert_eq!(settings.control.port, 1705);
        assert_eq!(settings.stream.buffer_ms, 1000);
        assert_eq!(settings.source.read_interval_ms, 20);
        assert_eq!(settings.source.codec, "pcm");
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn test_minimal_settings() {
        let toml = r#"
[stream]
port = 2000
buffer_ms = 500

[source]
sample_format = "44100:16:2"
"#;
        let settings = Settings::from_str(toml).unwrap();
        assert_eq!(settings.stream.port, 2000);
        assert_eq!(settings.stream.buffer_ms, 500);
        assert_eq!(settings.sample_format().unwrap().rate, 44_100);
        // Untouched sections keep defaults.
        assert_eq!(settings.control.port, 1705);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Settings::from_str("invalid { toml").is_err());
    }

    #[test]
    fn test_port_conflict_rejected() {
        let toml = "[stream]\nport = 1705\n";
        let err = Settings::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("conflicts"));
    }

    #[test]
    fn test_bad_sample_format_rejected() {
        let toml = "[source]\nsample_format = \"48000:x:2\"\n";
        assert!(Settings::from_str(toml).is_err());
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let toml = "[source]\ncodec = \"opus\"\n";
        let err = Settings::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("unknown codec"));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let toml = "[stream]\nbuffer_ms = 0\n";
        assert!(Settings::from_str(toml).is_err());
    }

    #[test]
    fn test_interval_beyond_buffer_rejected() {
        let toml = "[stream]\nbuffer_ms = 10\n\n[source]\nread_interval_ms = 20\n";
        assert!(Settings::from_str(toml).is_err());
    }
}
