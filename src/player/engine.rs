use crate::core::{AudioChunk, PlanarFrame, StreamInfo};
use crate::player::audio_output::AudioSpec;
use std::time::Duration;

/// MPEG-1 音频每帧样本数
pub const SAMPLES_PER_FRAME: u32 = 1152;

/// 视频帧回调
///
/// 在调用 `decode`/`seek` 的线程上同步执行，返回前结束；帧数据只在回调期间有效。
/// 同一时刻不会有两个回调并发执行，也不会和 present 重叠。
pub type VideoCallback = Box<dyn FnMut(&PlanarFrame<'_>)>;

/// 音频块回调，执行约束同 [`VideoCallback`]
pub type AudioCallback = Box<dyn FnMut(&AudioChunk<'_>)>;

/// 解码引擎接口（外部协作者）
///
/// 推模式：`decode(dt)` 把内部媒体时间推进至多 `dt`，期间为产出的每一帧/每一块样本
/// 同步调用已注册的回调。
pub trait DecodeEngine {
    /// 流元数据
    fn stream_info(&self) -> StreamInfo;

    fn set_video_enabled(&mut self, enabled: bool);

    fn set_audio_enabled(&mut self, enabled: bool);

    fn set_video_callback(&mut self, callback: VideoCallback);

    fn set_audio_callback(&mut self, callback: AudioCallback);

    /// 音频相对视频时钟的提前量
    fn set_audio_lead_time(&mut self, lead: Duration);

    /// 音频设备实际提供的规格（采样率、声道数、样本格式），引擎按它输出；
    /// 不支持的引擎可以忽略
    fn set_audio_output(&mut self, _output: AudioSpec) {}

    /// 推进媒体时间
    fn decode(&mut self, elapsed: Duration);

    /// 跳转到 `time` 秒；`exact` 为 false 时允许落在附近的关键帧上。
    /// 跳转本身可能触发一次视频回调。返回是否成功。
    fn seek(&mut self, time: f64, exact: bool) -> bool;

    /// 当前媒体时间（秒）
    fn current_time(&self) -> f64;

    fn has_ended(&self) -> bool;
}
