//! Settings using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (`daq.toml` by default)
//! 3. Environment variables prefixed with `DAQ_`, with `__` separating nested keys
//!
//! # Example
//! ```no_run
//! use daq_core::config::DaqSettings;
//!
//! // DAQ_CARD__POLL_INTERVAL_MS=250 overrides [card] poll_interval_ms
//! let settings = DaqSettings::load()?;
//! println!("card board: {}", settings.card.board);
//! # Ok::<(), daq_core::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DaqError, DaqResult};
use crate::flow::{DEFAULT_CAMERA_POLL_INTERVAL, DEFAULT_CARD_POLL_INTERVAL};

/// Upper bound on camera ring size imposed by the SDK.
pub const MAX_CAMERA_BUFFERS: usize = 16;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaqSettings {
    /// Tracing output.
    pub logging: LoggingSettings,
    /// Analog input card.
    pub card: CardSettings,
    /// Buffer-ring camera.
    pub camera: CameraSettings,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// Single-line output without ANSI colours.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Analog input card settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSettings {
    /// Device identifier passed to the driver when opening the task.
    pub board: String,
    /// Timeout of each wait-until-done poll.
    pub poll_interval_ms: u64,
}

impl Default for CardSettings {
    fn default() -> Self {
        Self {
            board: "Dev1".to_string(),
            poll_interval_ms: DEFAULT_CARD_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl CardSettings {
    /// Settings for `board` with the default poll interval.
    pub fn for_board(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            ..Self::default()
        }
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Camera board number.
    pub board: u16,
    /// Buffers allocated when a recording starts with an empty ring.
    pub buffer_count: usize,
    /// Sleep between buffer status polls.
    pub poll_interval_ms: u64,
    /// Give up waiting for a single frame after this long. `None` waits forever.
    pub frame_timeout_ms: Option<u64>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            board: 0,
            buffer_count: 4,
            poll_interval_ms: DEFAULT_CAMERA_POLL_INTERVAL.as_millis() as u64,
            frame_timeout_ms: None,
        }
    }
}

impl CameraSettings {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-frame timeout, if any.
    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }
}

impl DaqSettings {
    /// Load settings from `daq.toml` and the environment.
    pub fn load() -> DaqResult<Self> {
        Self::load_from("daq.toml")
    }

    /// Load settings from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DaqResult<Self> {
        let settings: DaqSettings = Figment::from(Serialized::defaults(DaqSettings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQ_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> DaqResult<()> {
        if self.card.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "card.poll_interval_ms must be positive".into(),
            ));
        }
        if self.camera.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "camera.poll_interval_ms must be positive".into(),
            ));
        }
        if self.camera.buffer_count == 0 || self.camera.buffer_count > MAX_CAMERA_BUFFERS {
            return Err(DaqError::Configuration(format!(
                "camera.buffer_count must be between 1 and {}, got {}",
                MAX_CAMERA_BUFFERS, self.camera.buffer_count
            )));
        }
        if self.camera.frame_timeout_ms == Some(0) {
            return Err(DaqError::Configuration(
                "camera.frame_timeout_ms must be positive when set".into(),
            ));
        }
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = DaqSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.card.poll_interval(), DEFAULT_CARD_POLL_INTERVAL);
        assert_eq!(settings.camera.poll_interval(), DEFAULT_CAMERA_POLL_INTERVAL);
        assert_eq!(settings.camera.buffer_count, 4);
        assert_eq!(settings.camera.frame_timeout(), None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[camera]
board = 1
buffer_count = 8
frame_timeout_ms = 500

[logging]
format = "json"
"#
        )
        .unwrap();

        let settings = DaqSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.camera.board, 1);
        assert_eq!(settings.camera.buffer_count, 8);
        assert_eq!(
            settings.camera.frame_timeout(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.camera.poll_interval_ms, 1);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DaqSettings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.camera.buffer_count, 4);
        assert_eq!(settings.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_oversized_ring_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[camera]\nbuffer_count = 17").unwrap();

        let err = DaqSettings::load_from(file.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bad_type_is_settings_error() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[camera]\nbuffer_count = \"many\"").unwrap();

        let err = DaqSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, DaqError::Settings(_)));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut settings = DaqSettings::default();
        settings.logging.level = "verbose".into();
        assert!(settings.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("daq.toml", "[card]\nboard = \"Dev2\"\npoll_interval_ms = 1000")?;
            jail.set_env("DAQ_CARD__POLL_INTERVAL_MS", "250");

            let settings = DaqSettings::load_from("daq.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.card.board, "Dev2");
            assert_eq!(settings.card.poll_interval(), Duration::from_millis(250));
            Ok(())
        });
    }
}
