//! Controller output reports and the thread that sends them

pub mod report;
mod router;

pub use report::{
    audio_report_crc, control_report, verify_audio_report, AudioReportFramer, AudioReportKind,
    ControllerSettings, OutputMode,
};
pub use router::{HidAudioRouter, RouterConfig, RouterExit, DEFAULT_JOIN_TIMEOUT};
