//! Chorus configuration
//!
//! TOML-based server settings with sensible defaults - a missing or empty
//! config file yields a working server - plus the persistent client
//! registry that survives restarts.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use chorus_config::Settings;
//! use std::str::FromStr;
//!
//! let settings = Settings::from_str("[stream]\nport = 1704").unwrap();
//! assert_eq!(settings.stream.port, 1704);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [stream]
//! port = 1704
//! buffer_ms = 1000
//!
//! [control]
//! port = 1705
//!
//! [source]
//! fifo = "/tmp/chorus_fifo"
//! codec = "pcm"
//! sample_format = "48000:16:2"
//! read_interval_ms = 20
//!
//! [state]
//! clients_file = "clients.json"
//! ```

mod clients;
mod error;
mod settings;

pub use clients::{ClientInfo, ClientRegistry, Volume};
pub use error::{ConfigError, Result};
pub use settings::{
    ControlConfig, LogConfig, Settings, SourceConfig, StateConfig, StreamConfig,
};
