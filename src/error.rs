//! Unified error types for ds4stream

use thiserror::Error;

/// Main error type for ds4stream operations
#[derive(Error, Debug)]
pub enum StreamerError {
    /// Windows API call failed
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    Platform(#[from] windows::core::Error),

    /// The HID device could not be opened
    #[error("Failed to open device '{path}': {message}")]
    DeviceOpen { path: String, message: String },

    /// Writing an output report failed
    #[error("Device write failed: {0}")]
    DeviceWrite(String),

    /// The controller went away
    #[error("Device disconnected")]
    DeviceDisconnected,

    /// Audio capture could not be set up or failed
    #[error("Capture error: {0}")]
    Capture(String),

    /// Capture format the pipeline cannot consume
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Sample-rate converter failure
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// Codec failure
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Write larger than the ring buffer itself
    #[error("Write of {requested} elements exceeds buffer capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// Downmix needs at least a stereo source
    #[error("Cannot downmix {0} channel(s), need at least 2")]
    InvalidChannelCount(u16),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine already running
    #[error("Stream engine already running")]
    AlreadyRunning,

    /// Operation not available on this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ds4stream operations
pub type Result<T> = std::result::Result<T, StreamerError>;

impl StreamerError {
    /// Create a device open error with context
    pub fn device_open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceOpen {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error ends the streaming session
    ///
    /// Contract violations and configuration errors are reported to the
    /// caller as well, but they never happen mid-session.
    pub fn is_fatal(&self) -> bool {
        match self {
            #[cfg(windows)]
            StreamerError::Platform(_) => true,
            StreamerError::DeviceOpen { .. }
            | StreamerError::DeviceWrite(_)
            | StreamerError::DeviceDisconnected
            | StreamerError::Capture(_)
            | StreamerError::Resampler(_)
            | StreamerError::Encoder(_)
            | StreamerError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(StreamerError::DeviceDisconnected.is_fatal());
        assert!(StreamerError::DeviceWrite("gone".into()).is_fatal());
        assert!(StreamerError::device_open("\\\\?\\hid#x", "denied").is_fatal());
        assert!(!StreamerError::InvalidChannelCount(1).is_fatal());
        assert!(!StreamerError::CapacityExceeded {
            requested: 10,
            capacity: 4
        }
        .is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = StreamerError::device_open("path-1", "access denied");
        assert_eq!(
            err.to_string(),
            "Failed to open device 'path-1': access denied"
        );
    }
}
