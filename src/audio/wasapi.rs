//! WASAPI capture from the default render (loopback) or capture endpoint

use crate::audio::capture::{sample_format_for, CaptureHandler, CaptureOptions, CaptureSource};
use crate::audio::AudioFormat;
use crate::error::{Result, StreamerError};
use crossbeam_channel::bounded;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0},
        Media::Audio::{
            eCapture, eConsole, eRender, IAudioCaptureClient, IAudioClient, IMMDeviceEnumerator,
            MMDeviceEnumerator, AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_EVENTCALLBACK, AUDCLNT_STREAMFLAGS_LOOPBACK,
        },
        System::{
            Com::{
                CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL, COINIT_MULTITHREADED,
            },
            Threading::{CreateEventW, WaitForSingleObject},
        },
    },
};

/// Wait per capture event before re-checking the stop flag
const READ_TIMEOUT_MS: u32 = 100;

/// Capture source backed by a shared-mode WASAPI stream
///
/// COM objects stay on the capture thread; this handle only carries the
/// negotiated format and the thread's controls.
pub struct WasapiCapture {
    options: CaptureOptions,
    format: AudioFormat,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<CaptureHandler>>,
    /// Handler returned by the thread after `stop`, released on drop
    handler: Option<CaptureHandler>,
}

impl WasapiCapture {
    /// Probe the default endpoint and remember its mix format
    pub fn open(options: &CaptureOptions) -> Result<Self> {
        let stream = CaptureStream::open(options)?;
        let format = stream.format.clone();
        drop(stream);

        Ok(Self {
            options: options.clone(),
            format,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
            handler: None,
        })
    }
}

impl CaptureSource for WasapiCapture {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn start(&mut self, handler: CaptureHandler) -> Result<()> {
        if self.handle.is_some() {
            return Err(StreamerError::AlreadyRunning);
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        self.handler = None;

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let options = self.options.clone();
        let expected = self.format.clone();
        let stop_flag = self.stop_flag.clone();

        let handle = thread::Builder::new()
            .name("wasapi-capture".to_string())
            .spawn(move || capture_thread(options, expected, handler, stop_flag, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.handler = handle.join().ok();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(StreamerError::Capture(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.stop_flag.store(true, Ordering::SeqCst);
        match handle.join() {
            Ok(handler) => self.handler = Some(handler),
            Err(_) => warn!("Capture thread panicked"),
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Capture thread function
///
/// Returns the handler so the owner controls when the pipeline is released.
fn capture_thread(
    options: CaptureOptions,
    expected: AudioFormat,
    mut handler: CaptureHandler,
    stop_flag: Arc<AtomicBool>,
    ready_tx: crossbeam_channel::Sender<Result<()>>,
) -> CaptureHandler {
    let mut stream = match CaptureStream::open(&options) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return handler;
        }
    };

    if stream.format.sample_rate != expected.sample_rate
        || stream.format.channels != expected.channels
        || stream.format.sample_format != expected.sample_format
    {
        let _ = ready_tx.send(Err(StreamerError::UnsupportedFormat(format!(
            "endpoint format changed from {} to {}",
            expected, stream.format
        ))));
        return handler;
    }

    if let Err(e) = stream.start() {
        let _ = ready_tx.send(Err(e));
        return handler;
    }
    let _ = ready_tx.send(Ok(()));

    info!("Capture thread started");

    let mut data = Vec::with_capacity(expected.buffer_size_for_ms(options.device_buffer_ms));

    while !stop_flag.load(Ordering::Relaxed) {
        data.clear();
        match stream.read_packets(READ_TIMEOUT_MS, &mut data) {
            Ok(()) => {
                if !data.is_empty() {
                    handler(&data);
                }
            }
            Err(e) => {
                error!("Capture error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    let _ = stream.stop();
    info!("Capture thread stopped");
    handler
}

/// Initialized audio client on the calling thread
struct CaptureStream {
    audio_client: IAudioClient,
    capture_client: IAudioCaptureClient,
    format: AudioFormat,
    event: HANDLE,
    started: bool,
}

impl CaptureStream {
    fn open(options: &CaptureOptions) -> Result<Self> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);

            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;

            let flow = if options.loopback { eRender } else { eCapture };
            let device = enumerator.GetDefaultAudioEndpoint(flow, eConsole)?;

            let device_id = {
                let id_ptr = device.GetId()?;
                let id = PCWSTR(id_ptr.0).to_string().unwrap_or_default();
                CoTaskMemFree(Some(id_ptr.0 as *const _));
                id
            };
            debug!(
                "Opening {} capture on device: {}",
                if options.loopback { "loopback" } else { "input" },
                device_id
            );

            let audio_client: IAudioClient = device.Activate(CLSCTX_ALL, None)?;

            let format_ptr = audio_client.GetMixFormat()?;
            let mix = &*format_ptr;

            let sample_format = match sample_format_for(mix.wFormatTag, mix.wBitsPerSample) {
                Ok(sample_format) => sample_format,
                Err(e) => {
                    CoTaskMemFree(Some(format_ptr as *const _ as *const _));
                    return Err(e);
                }
            };

            let format = AudioFormat {
                sample_rate: mix.nSamplesPerSec,
                channels: mix.nChannels,
                bits_per_sample: mix.wBitsPerSample,
                block_align: mix.nBlockAlign,
                sample_format,
            };
            debug!("Capture format: {}", format);

            let event = CreateEventW(None, false, false, None)?;

            let mut flags = AUDCLNT_STREAMFLAGS_EVENTCALLBACK;
            if options.loopback {
                flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
            }
            // 100-nanosecond units
            let buffer_duration = options.device_buffer_ms as i64 * 10_000;

            let initialized = audio_client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                flags,
                buffer_duration,
                0,
                format_ptr,
                None,
            );
            CoTaskMemFree(Some(format_ptr as *const _ as *const _));
            if let Err(e) = initialized {
                let _ = CloseHandle(event);
                return Err(e.into());
            }

            audio_client.SetEventHandle(event)?;
            trace!("Capture buffer size: {} frames", audio_client.GetBufferSize()?);

            let capture_client: IAudioCaptureClient = audio_client.GetService()?;

            Ok(Self {
                audio_client,
                capture_client,
                format,
                event,
                started: false,
            })
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        unsafe {
            self.audio_client.Start()?;
        }
        self.started = true;
        info!("WASAPI capture started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        unsafe {
            self.audio_client.Stop()?;
        }
        self.started = false;
        info!("WASAPI capture stopped");
        Ok(())
    }

    /// Wait for the capture event and append every pending packet to `out`
    ///
    /// Silent packets are appended as zeros so the stream keeps its timing.
    fn read_packets(&self, timeout_ms: u32, out: &mut Vec<u8>) -> Result<()> {
        unsafe {
            if WaitForSingleObject(self.event, timeout_ms) != WAIT_OBJECT_0 {
                return Ok(());
            }

            while self.capture_client.GetNextPacketSize()? > 0 {
                let mut data_ptr: *mut u8 = ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                self.capture_client
                    .GetBuffer(&mut data_ptr, &mut num_frames, &mut flags, None, None)?;

                let byte_count = self.format.frames_to_bytes(num_frames);
                let silent = (flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;

                if silent || data_ptr.is_null() {
                    out.resize(out.len() + byte_count, 0);
                } else {
                    out.extend_from_slice(std::slice::from_raw_parts(data_ptr, byte_count));
                }

                self.capture_client.ReleaseBuffer(num_frames)?;
                trace!("Captured {} frames, silent={}", num_frames, silent);
            }
        }
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        let _ = self.stop();
        unsafe {
            if !self.event.is_invalid() {
                let _ = CloseHandle(self.event);
            }
        }
    }
}
