//! Controller HID device access

#[cfg(windows)]
mod hid;

#[cfg(windows)]
pub use hid::HidDevice;

use crate::error::Result;
#[cfg(not(windows))]
use crate::error::StreamerError;
use tracing::{info, warn};

/// Sink for raw HID output reports
pub trait OutputReportWriter: Send {
    /// Write one complete output report
    ///
    /// `report` is exactly the bytes to send, report id first.
    fn write_output_report(&mut self, report: &[u8]) -> Result<()>;
}

impl<W: OutputReportWriter + ?Sized> OutputReportWriter for Box<W> {
    fn write_output_report(&mut self, report: &[u8]) -> Result<()> {
        (**self).write_output_report(report)
    }
}

/// How the device handle is shared with other processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// No other process may open the device
    Exclusive,
    /// Reads and writes are shared
    Shared,
}

/// Open a controller for report output
///
/// Tries an exclusive handle first so other HID clients cannot interleave
/// output reports, then falls back to a shared one.
pub fn open(path: &str) -> Result<Box<dyn OutputReportWriter>> {
    match open_with(path, ShareMode::Exclusive) {
        Ok(device) => {
            info!("Opened controller exclusively: {}", path);
            Ok(device)
        }
        Err(e) => {
            warn!("Exclusive open failed ({}), retrying shared", e);
            let device = open_with(path, ShareMode::Shared)?;
            info!("Opened controller in shared mode: {}", path);
            Ok(device)
        }
    }
}

/// Open a controller with an explicit share mode
#[cfg(windows)]
pub fn open_with(path: &str, mode: ShareMode) -> Result<Box<dyn OutputReportWriter>> {
    Ok(Box::new(HidDevice::open(path, mode)?))
}

#[cfg(not(windows))]
pub fn open_with(path: &str, _mode: ShareMode) -> Result<Box<dyn OutputReportWriter>> {
    Err(StreamerError::Unsupported(format!(
        "HID output to {} is only available on Windows",
        path
    )))
}

/// Whether a device exists at `path` and can be opened
#[cfg(windows)]
pub fn is_connected(path: &str) -> bool {
    hid::probe(path)
}

#[cfg(not(windows))]
pub fn is_connected(_path: &str) -> bool {
    false
}
