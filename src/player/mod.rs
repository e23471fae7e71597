// 播放器核心模块：解码引擎接口、节拍器、控制状态与音频输出

pub mod audio_output;
pub mod control;
pub mod engine;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_engine;
pub mod pacer;
pub mod session;
pub mod synthetic;

pub use audio_output::{lead_time, AudioDevice, AudioSink, AudioSpec, AudioStats};
#[cfg(feature = "cpal")]
pub use audio_output::CpalDevice;
pub use control::{
    control_channel, ChannelEvents, ControlEvent, ControlState, DisplayEffect, EventSource, Key,
    NoEvents,
};
pub use engine::{AudioCallback, DecodeEngine, VideoCallback, SAMPLES_PER_FRAME};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_engine::FfmpegEngine;
pub use pacer::{Pacer, PacerStats, TickContext, TickOutcome};
pub use session::{run, PlaybackStats, Session, SessionBuilder, SharedAudio, SharedPresenter};
pub use synthetic::{SyntheticConfig, SyntheticEngine};
