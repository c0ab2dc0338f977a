//! Worker thread moving encoded frames to the controller

use crate::audio::{RingBuffer, StreamStats};
use crate::device::OutputReportWriter;
use crate::error::Result;
use crate::hid::report::{control_report, AudioReportFramer, ControllerSettings, OutputMode};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for the thread before detaching it
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Router settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub output_mode: OutputMode,
    /// Upper bound on each wait for the frames-available signal
    pub wait_timeout: Duration,
    /// Configuration report sent once before any audio
    pub init_report: Option<ControllerSettings>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::Speaker,
            wait_timeout: Duration::from_millis(20),
            init_report: Some(ControllerSettings::default()),
        }
    }
}

/// What the router thread hands back when it ends
pub struct RouterExit {
    /// The device, returned so the caller decides when to close it
    pub writer: Box<dyn OutputReportWriter>,
    /// `Err` when a device write ended the session
    pub result: Result<()>,
}

/// Handle to the running router thread
pub struct HidAudioRouter {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exit_rx: Receiver<RouterExit>,
}

impl HidAudioRouter {
    /// Start the router thread
    ///
    /// The thread waits on `signal`, re-checking `frames` at least every
    /// `config.wait_timeout`, and sends a report whenever two or more
    /// whole frames are buffered.
    pub fn spawn(
        writer: Box<dyn OutputReportWriter>,
        frames: Arc<RingBuffer<u8>>,
        frame_size: usize,
        signal: Receiver<()>,
        config: RouterConfig,
        stats: Arc<StreamStats>,
    ) -> Result<Self> {
        let framer = AudioReportFramer::new(config.output_mode, frame_size)?;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = bounded(1);

        let thread_stop = stop_flag.clone();
        let handle = thread::Builder::new()
            .name("hid-router".to_string())
            .spawn(move || {
                let mut writer = writer;
                let result = router_thread(
                    writer.as_mut(),
                    framer,
                    &frames,
                    &signal,
                    &config,
                    &stats,
                    &thread_stop,
                );
                if let Err(e) = &result {
                    error!("HID router stopped on error: {}", e);
                }
                let _ = exit_tx.send(RouterExit { writer, result });
            })?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
            exit_rx,
        })
    }

    /// Whether the thread has ended, either stopped or on a write failure
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal the thread to stop and wait at most `timeout` for it
    ///
    /// Returns `None` if the thread was already collected or did not exit
    /// in time; in the latter case it is detached.
    pub fn stop(&mut self, timeout: Duration) -> Option<RouterExit> {
        let handle = self.handle.take()?;
        self.stop_flag.store(true, Ordering::SeqCst);

        match self.exit_rx.recv_timeout(timeout) {
            Ok(exit) => {
                let _ = handle.join();
                Some(exit)
            }
            Err(_) => {
                warn!(
                    "HID router did not exit within {:?}, detaching thread",
                    timeout
                );
                None
            }
        }
    }
}

impl Drop for HidAudioRouter {
    fn drop(&mut self) {
        let _ = self.stop(DEFAULT_JOIN_TIMEOUT);
    }
}

fn router_thread(
    writer: &mut dyn OutputReportWriter,
    mut framer: AudioReportFramer,
    frames: &RingBuffer<u8>,
    signal: &Receiver<()>,
    config: &RouterConfig,
    stats: &StreamStats,
    stop_flag: &AtomicBool,
) -> Result<()> {
    info!("HID router started ({:?})", config.output_mode);

    if let Some(settings) = &config.init_report {
        writer.write_output_report(&control_report(settings))?;
        debug!("Sent controller configuration report");
    }

    while !stop_flag.load(Ordering::Relaxed) {
        match signal.recv_timeout(config.wait_timeout) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Frame signal closed");
                break;
            }
        }

        while !stop_flag.load(Ordering::Relaxed) {
            let Some(report) = framer.next_report(frames) else {
                break;
            };
            writer.write_output_report(report)?;
            stats.record_report();
        }
    }

    info!(
        "HID router stopped after {} reports, next counter {}",
        stats.reports_sent(),
        framer.counter()
    );
    Ok(())
}
