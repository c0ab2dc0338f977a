//! Configuration file support

use crate::audio::{CaptureOptions, EngineConfig, StreamOptions, STREAM_SAMPLE_RATE};
use crate::hid::{ControllerSettings, OutputMode, RouterConfig, DEFAULT_JOIN_TIMEOUT};
use crate::sbc::SbcConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Streamer configuration loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerSettings {
    /// HID device path of the controller (empty = must be given on the command line)
    pub device_path: String,

    /// Speaker or headset jack
    pub output_mode: OutputMode,

    /// Send the LED/volume report before streaming
    pub send_init_report: bool,

    /// Lightbar color as [r, g, b]
    pub led: [u8; 3],

    pub volume_left: u8,
    pub volume_right: u8,
    pub volume_speaker: u8,
    pub volume_mic: u8,

    /// Ring buffer length in milliseconds of captured audio
    pub buffer_ms: u32,

    /// Encoded frames buffered before the sender is woken
    pub min_buffered_frames: usize,

    /// Longest the sender sleeps without a wake-up
    pub wait_timeout_ms: u64,

    /// SBC bitpool
    pub bitpool: u8,

    /// Fold surround captures down to stereo
    pub downmix: bool,

    /// Capture system output (true) or the default microphone (false)
    pub loopback: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = log to the console)
    pub log_file: String,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        let controller = ControllerSettings::default();
        Self {
            device_path: String::new(),
            output_mode: OutputMode::Speaker,
            send_init_report: true,
            led: controller.led,
            volume_left: controller.volume_left,
            volume_right: controller.volume_right,
            volume_speaker: controller.volume_speaker,
            volume_mic: controller.volume_mic,
            buffer_ms: 32,
            min_buffered_frames: 4,
            wait_timeout_ms: 20,
            bitpool: 48,
            downmix: true,
            loopback: true,
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl StreamerSettings {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ds4stream").join("config.toml"))
    }

    /// Load from the default location, or return defaults if there is no file
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        write_file(path.as_ref(), &content)
    }

    /// Write the commented sample to `path`
    pub fn write_sample<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        write_file(path.as_ref(), &Self::sample_config())
    }

    /// Check values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sbc_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.buffer_ms == 0 {
            return Err(ConfigError::Invalid("buffer_ms must be positive".to_string()));
        }
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn sbc_config(&self) -> SbcConfig {
        SbcConfig {
            sample_rate: STREAM_SAMPLE_RATE,
            bitpool: self.bitpool,
            ..SbcConfig::default()
        }
    }

    /// Which endpoint to capture from
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            loopback: self.loopback,
            ..CaptureOptions::default()
        }
    }

    /// Convert to EngineConfig
    pub fn to_engine_config(&self) -> EngineConfig {
        let init_report = self.send_init_report.then(|| ControllerSettings {
            led: self.led,
            volume_left: self.volume_left,
            volume_right: self.volume_right,
            volume_mic: self.volume_mic,
            volume_speaker: self.volume_speaker,
        });

        EngineConfig {
            stream: StreamOptions {
                buffer_ms: self.buffer_ms,
                min_buffered_frames: self.min_buffered_frames,
                downmix: self.downmix,
                sbc: self.sbc_config(),
            },
            router: RouterConfig {
                output_mode: self.output_mode,
                wait_timeout: Duration::from_millis(self.wait_timeout_ms),
                init_report,
            },
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# ds4stream configuration

# HID device path of the controller, e.g.
# device_path = "\\?\hid#{00001124-0000-1000-8000-00805f9b34fb}_vid&0002054c_pid&09cc#..."
device_path = ""

# "speaker" or "headset"
output_mode = "speaker"

# Send the LED/volume report before audio starts
send_init_report = true

# Lightbar color [r, g, b]
led = [0, 0, 64]

# Channel volumes (0-255)
volume_left = 80
volume_right = 80
volume_speaker = 80
volume_mic = 0

# Ring buffer length in milliseconds (default: 32)
buffer_ms = 32

# Encoded frames buffered before the sender wakes (default: 4)
min_buffered_frames = 4

# Longest wait between buffer checks in milliseconds (default: 20)
wait_timeout_ms = 20

# SBC bitpool (default: 48)
bitpool = 48

# Fold surround output down to stereo
downmix = true

# Capture system output (true) or the default microphone (false)
loopback = true

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = console)
log_file = ""
"#
        .to_string()
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    std::fs::write(path, content).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    /// Values out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ds4stream-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_sample_matches_defaults() {
        let parsed: StreamerSettings = toml::from_str(&StreamerSettings::sample_config()).unwrap();
        assert_eq!(parsed, StreamerSettings::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: StreamerSettings = toml::from_str(
            r#"
            device_path = "dev-1"
            output_mode = "headset"
            bitpool = 35
            "#,
        )
        .unwrap();

        assert_eq!(parsed.device_path, "dev-1");
        assert_eq!(parsed.output_mode, OutputMode::Headset);
        assert_eq!(parsed.bitpool, 35);
        assert_eq!(parsed.buffer_ms, 32);
        assert!(parsed.loopback);
    }

    #[test]
    fn test_unknown_output_mode_rejected() {
        assert!(toml::from_str::<StreamerSettings>(r#"output_mode = "earbuds""#).is_err());
    }

    #[test]
    fn test_engine_config_conversion() {
        let settings = StreamerSettings {
            output_mode: OutputMode::Headset,
            wait_timeout_ms: 15,
            min_buffered_frames: 6,
            led: [1, 2, 3],
            ..StreamerSettings::default()
        };
        let config = settings.to_engine_config();

        assert_eq!(config.router.output_mode, OutputMode::Headset);
        assert_eq!(config.router.wait_timeout, Duration::from_millis(15));
        assert_eq!(config.router.init_report.unwrap().led, [1, 2, 3]);
        assert_eq!(config.stream.min_buffered_frames, 6);
        assert_eq!(config.stream.sbc.sample_rate, 32000);
        assert_eq!(config.stream.sbc.frame_length(), 109);

        let settings = StreamerSettings {
            send_init_report: false,
            ..StreamerSettings::default()
        };
        assert!(settings.to_engine_config().router.init_report.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(StreamerSettings::default().validate().is_ok());

        let settings = StreamerSettings {
            bitpool: 0,
            ..StreamerSettings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let settings = StreamerSettings {
            wait_timeout_ms: 0,
            ..StreamerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip.toml");
        let settings = StreamerSettings {
            device_path: "dev-2".to_string(),
            volume_speaker: 100,
            ..StreamerSettings::default()
        };

        settings.save(&path).unwrap();
        let loaded = StreamerSettings::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = StreamerSettings::load(temp_path("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
