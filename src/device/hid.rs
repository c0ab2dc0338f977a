//! Win32 HID handle with overlapped writes

use crate::device::{OutputReportWriter, ShareMode};
use crate::error::{Result, StreamerError};
use tracing::{debug, trace};
use windows::{
    core::HSTRING,
    Win32::{
        Foundation::{
            CloseHandle, ERROR_DEVICE_NOT_CONNECTED, ERROR_IO_PENDING, GENERIC_READ,
            GENERIC_WRITE, HANDLE,
        },
        Storage::FileSystem::{
            CreateFileW, WriteFile, FILE_FLAG_OVERLAPPED, FILE_SHARE_MODE, FILE_SHARE_READ,
            FILE_SHARE_WRITE, OPEN_EXISTING,
        },
        System::{
            Threading::CreateEventW,
            IO::{GetOverlappedResult, OVERLAPPED},
        },
    },
};

/// Open HID device handle
pub struct HidDevice {
    handle: HANDLE,
    /// Manual-reset event signalled when an overlapped write completes
    event: HANDLE,
    path: String,
}

// SAFETY: the handles are only used by the thread that owns the HidDevice;
// Win32 file and event handles are not tied to the creating thread
unsafe impl Send for HidDevice {}

impl HidDevice {
    /// Open the device at `path` for overlapped writes
    pub fn open(path: &str, mode: ShareMode) -> Result<Self> {
        let share = match mode {
            ShareMode::Exclusive => FILE_SHARE_MODE(0),
            ShareMode::Shared => FILE_SHARE_READ | FILE_SHARE_WRITE,
        };

        unsafe {
            let handle = CreateFileW(
                &HSTRING::from(path),
                GENERIC_READ.0 | GENERIC_WRITE.0,
                share,
                None,
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                HANDLE::default(),
            )
            .map_err(|e| StreamerError::device_open(path, e.message()))?;

            let event = match CreateEventW(None, true, false, None) {
                Ok(event) => event,
                Err(e) => {
                    let _ = CloseHandle(handle);
                    return Err(e.into());
                }
            };

            debug!("HID handle opened ({:?}): {}", mode, path);

            Ok(Self {
                handle,
                event,
                path: path.to_string(),
            })
        }
    }
}

impl OutputReportWriter for HidDevice {
    fn write_output_report(&mut self, report: &[u8]) -> Result<()> {
        let mut overlapped = OVERLAPPED {
            hEvent: self.event,
            ..Default::default()
        };
        let mut written = 0u32;

        unsafe {
            if let Err(e) = WriteFile(self.handle, Some(report), None, Some(&mut overlapped)) {
                if e.code() != ERROR_IO_PENDING.to_hresult() {
                    return Err(map_write_error(e));
                }
            }

            GetOverlappedResult(self.handle, &overlapped, &mut written, true)
                .map_err(map_write_error)?;
        }

        trace!("Wrote {} of {} report bytes", written, report.len());

        if written as usize != report.len() {
            return Err(StreamerError::DeviceWrite(format!(
                "short write: {} of {} bytes",
                written,
                report.len()
            )));
        }

        Ok(())
    }
}

impl Drop for HidDevice {
    fn drop(&mut self) {
        unsafe {
            if !self.handle.is_invalid() {
                let _ = CloseHandle(self.handle);
            }
            if !self.event.is_invalid() {
                let _ = CloseHandle(self.event);
            }
        }
        debug!("HID handle closed: {}", self.path);
    }
}

fn map_write_error(e: windows::core::Error) -> StreamerError {
    if e.code() == ERROR_DEVICE_NOT_CONNECTED.to_hresult() {
        StreamerError::DeviceDisconnected
    } else {
        StreamerError::DeviceWrite(e.message())
    }
}

/// Check that a handle can be opened without claiming read or write access
pub(crate) fn probe(path: &str) -> bool {
    unsafe {
        match CreateFileW(
            &HSTRING::from(path),
            0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            HANDLE::default(),
        ) {
            Ok(handle) => {
                let _ = CloseHandle(handle);
                true
            }
            Err(_) => false,
        }
    }
}
