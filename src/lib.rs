//! ds4stream - DualShock 4 Bluetooth audio
//!
//! Captures what the PC is playing, encodes it as SBC, and streams it to a
//! DualShock 4 controller's speaker or headset jack as HID output reports.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod hid;
pub mod sbc;

pub use error::{Result, StreamerError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
