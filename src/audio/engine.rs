//! Stream engine - session lifecycle around capture, pipeline, and router

use crate::audio::capture::CaptureSource;
use crate::audio::stream::{SbcAudioStream, StreamOptions, StreamStats};
use crate::audio::AudioFormat;
use crate::device::OutputReportWriter;
use crate::error::{Result, StreamerError};
use crate::hid::{HidAudioRouter, RouterConfig, RouterExit, DEFAULT_JOIN_TIMEOUT};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub stream: StreamOptions,
    pub router: RouterConfig,
    /// Longest wait for the router thread during `stop`
    pub join_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamOptions::default(),
            router: RouterConfig::default(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never started
    Uninitialized,
    /// Started once, now idle
    Stopped,
    /// Streaming
    Running,
    /// Tearing down
    ShuttingDown,
}

/// One streaming session: capture feeds the pipeline, the router feeds the device
pub struct StreamEngine {
    config: EngineConfig,
    state: Mutex<EngineState>,
    /// Owns the capture handler, and through it the pipeline
    capture: Option<Box<dyn CaptureSource>>,
    router: Option<HidAudioRouter>,
    stats: Option<Arc<StreamStats>>,
    format: Option<AudioFormat>,
}

impl StreamEngine {
    /// Create a new engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState::Uninitialized),
            capture: None,
            router: None,
            stats: None,
            format: None,
        }
    }

    /// Get current engine state
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Capture format of the running session
    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    /// Counters of the current or last session
    pub fn stats(&self) -> Option<Arc<StreamStats>> {
        self.stats.clone()
    }

    /// Build the pipeline, start the router, then start capturing
    ///
    /// The device is owned by the router thread until `stop`.
    pub fn start(
        &mut self,
        mut capture: Box<dyn CaptureSource>,
        writer: Box<dyn OutputReportWriter>,
    ) -> Result<()> {
        if *self.state.lock() == EngineState::Running {
            return Err(StreamerError::AlreadyRunning);
        }

        info!("Starting stream engine...");

        let format = capture.format().clone();
        info!("Capture format: {}", format);

        let (signal_tx, signal_rx) = bounded::<()>(1);
        let mut stream = SbcAudioStream::new(format.clone(), &self.config.stream, signal_tx)?;
        let stats = stream.stats();

        let mut router = HidAudioRouter::spawn(
            writer,
            stream.frames(),
            stream.frame_size(),
            signal_rx,
            self.config.router.clone(),
            stats.clone(),
        )?;

        if let Err(e) = capture.start(Box::new(move |data: &[u8]| stream.process_capture(data))) {
            error!("Failed to start capture: {}", e);
            let _ = router.stop(self.config.join_timeout);
            return Err(e);
        }

        self.capture = Some(capture);
        self.router = Some(router);
        self.stats = Some(stats);
        self.format = Some(format);
        *self.state.lock() = EngineState::Running;

        info!("Stream engine running");
        Ok(())
    }

    /// Tear the session down in order
    ///
    /// Capture stops first, then the router thread is joined (bounded), then
    /// the pipeline is released (encoder before converter), and the device
    /// is closed last. Returns the router's error if a device write ended
    /// the session.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Running {
                return Ok(());
            }
            *state = EngineState::ShuttingDown;
        }

        info!("Stopping stream engine...");

        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.stop() {
                warn!("Failed to stop capture: {}", e);
            }
        }

        let exit = self
            .router
            .take()
            .and_then(|mut router| router.stop(self.config.join_timeout));

        // Drops the capture handler and the pipeline it owns
        self.capture = None;

        let result = match exit {
            Some(RouterExit { writer, result }) => {
                drop(writer);
                result
            }
            None => Ok(()),
        };

        if let Some(stats) = &self.stats {
            info!("Session totals: {}", stats);
        }
        self.format = None;

        *self.state.lock() = EngineState::Stopped;
        info!("Stream engine stopped");

        result
    }

    /// Check if the session is alive
    ///
    /// Turns false on its own when the router ends after a device error.
    pub fn is_running(&self) -> bool {
        *self.state.lock() == EngineState::Running
            && self.router.as_ref().is_some_and(|r| !r.is_finished())
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::CaptureHandler;
    use crate::audio::SampleFormat;
    use crate::hid::verify_audio_report;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    /// Plays a 48 kHz float sine, 10ms per callback, then idles
    struct FakeCapture {
        format: AudioFormat,
        blocks: usize,
        fail_start: bool,
        stop_flag: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        handle: Option<JoinHandle<CaptureHandler>>,
        handler: Option<CaptureHandler>,
    }

    impl FakeCapture {
        fn new(blocks: usize) -> Self {
            Self {
                format: AudioFormat::interleaved(48000, 2, SampleFormat::F32),
                blocks,
                fail_start: false,
                stop_flag: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                handle: None,
                handler: None,
            }
        }
    }

    impl CaptureSource for FakeCapture {
        fn format(&self) -> &AudioFormat {
            &self.format
        }

        fn start(&mut self, mut handler: CaptureHandler) -> Result<()> {
            if self.fail_start {
                return Err(StreamerError::Capture("no endpoint".to_string()));
            }

            let blocks = self.blocks;
            let stop_flag = self.stop_flag.clone();
            self.handle = Some(thread::spawn(move || {
                for block in 0..blocks {
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let data: Vec<u8> = (block * 480..(block + 1) * 480)
                        .flat_map(|i| {
                            let t = i as f32 / 48000.0;
                            let s = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3;
                            let mut bytes = [0u8; 8];
                            bytes[..4].copy_from_slice(&s.to_le_bytes());
                            bytes[4..].copy_from_slice(&s.to_le_bytes());
                            bytes
                        })
                        .collect();
                    handler(&data);
                    thread::sleep(Duration::from_millis(1));
                }
                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                handler
            }));
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.stop_flag.store(true, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                self.handler = handle.join().ok();
            }
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.handle.is_some()
        }
    }

    #[derive(Clone, Default)]
    struct FakeDevice {
        reports: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
        fail_after: Option<usize>,
    }

    impl OutputReportWriter for FakeDevice {
        fn write_output_report(&mut self, report: &[u8]) -> Result<()> {
            let mut reports = self.reports.lock();
            if self.fail_after.is_some_and(|n| reports.len() >= n) {
                return Err(StreamerError::DeviceDisconnected);
            }
            reports.push(report.to_vec());
            Ok(())
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_session_streams_valid_reports() {
        let device = FakeDevice::default();
        let reports = device.reports.clone();
        let mut engine = StreamEngine::new(EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine
            .start(Box::new(FakeCapture::new(40)), Box::new(device))
            .unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.is_running());
        assert_eq!(engine.format().unwrap().sample_rate, 48000);

        assert!(wait_until(Duration::from_secs(10), || reports.lock().len() >= 5));
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.is_running());

        let reports = reports.lock();
        assert_eq!(reports[0][0], 0x11);

        let audio = &reports[1..];
        for report in audio {
            assert!(matches!(report[0], 0x14 | 0x17));
            assert_eq!(report.len(), if report[0] == 0x17 { 462 } else { 270 });
            assert!(verify_audio_report(report));
        }
        for pair in audio.windows(2) {
            let counter = u16::from_le_bytes([pair[0][3], pair[0][4]]);
            let next = u16::from_le_bytes([pair[1][3], pair[1][4]]);
            let frames = if pair[0][0] == 0x17 { 4 } else { 2 };
            assert_eq!(next, counter.wrapping_add(frames));
        }

        let stats = engine.stats().unwrap();
        assert_eq!(stats.reports_sent(), audio.len() as u64);
        assert!(stats.frames_encoded() > 0);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut engine = StreamEngine::new(EngineConfig::default());
        engine
            .start(Box::new(FakeCapture::new(0)), Box::new(FakeDevice::default()))
            .unwrap();

        let err = engine
            .start(Box::new(FakeCapture::new(0)), Box::new(FakeDevice::default()))
            .unwrap_err();
        assert!(matches!(err, StreamerError::AlreadyRunning));
        engine.stop().unwrap();
    }

    #[test]
    fn test_capture_failure_aborts_start() {
        let mut capture = FakeCapture::new(0);
        capture.fail_start = true;

        let mut engine = StreamEngine::new(EngineConfig::default());
        let err = engine
            .start(Box::new(capture), Box::new(FakeDevice::default()))
            .unwrap_err();
        assert!(matches!(err, StreamerError::Capture(_)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_device_failure_ends_session() {
        let device = FakeDevice {
            fail_after: Some(2),
            ..FakeDevice::default()
        };
        let mut engine = StreamEngine::new(EngineConfig::default());
        engine
            .start(Box::new(FakeCapture::new(40)), Box::new(device))
            .unwrap();

        assert!(wait_until(Duration::from_secs(10), || !engine.is_running()));
        assert_eq!(engine.state(), EngineState::Running);

        let err = engine.stop().unwrap_err();
        assert!(matches!(err, StreamerError::DeviceDisconnected));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_drop_stops_capture() {
        let capture = FakeCapture::new(5);
        let stopped = capture.stopped.clone();

        let mut engine = StreamEngine::new(EngineConfig::default());
        engine
            .start(Box::new(capture), Box::new(FakeDevice::default()))
            .unwrap();
        drop(engine);

        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_restart_after_stop() {
        let mut engine = StreamEngine::new(EngineConfig::default());
        for _ in 0..2 {
            engine
                .start(Box::new(FakeCapture::new(2)), Box::new(FakeDevice::default()))
                .unwrap();
            engine.stop().unwrap();
        }
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
