use crate::core::{AudioChunk, PlanarFrame, Plane, SampleData, SampleFormat, StreamInfo};
use crate::player::audio_output::AudioSpec;
use crate::player::engine::{AudioCallback, DecodeEngine, VideoCallback, SAMPLES_PER_FRAME};
use log::{debug, info, warn};
use std::f64::consts::TAU;
use std::time::Duration;

const EPSILON: f64 = 1e-9;

/// 测试图案参数
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    /// 0 表示无音频流
    pub sample_rate: u32,
    pub duration: f64,
    pub has_video: bool,
    /// 关键帧间隔（帧），近似跳转会对齐到它
    pub gop: u64,
    /// 正弦测试音频率（Hz）
    pub tone_hz: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            framerate: 25.0,
            sample_rate: 44100,
            duration: 30.0,
            has_video: true,
            gop: 12,
            tone_hz: 440.0,
        }
    }
}

/// 测试图案解码引擎
///
/// 不依赖任何解码库，按 decode(dt)/帧率契约产出移动的亮度渐变和正弦音。
/// 平面按宏块对齐分配（与 MPEG-1 解码器输出一致），跨度等于对齐后的宽度。
pub struct SyntheticEngine {
    config: SyntheticConfig,
    video_enabled: bool,
    audio_enabled: bool,
    video_callback: Option<VideoCallback>,
    audio_callback: Option<AudioCallback>,
    lead_time: f64,
    /// 正弦音按这个规格生成
    audio_output: AudioSpec,
    time: f64,
    next_frame: u64,
    next_sample: u64,
    ended: bool,
    luma_stride: usize,
    chroma_stride: usize,
    planes: [Vec<u8>; 3],
    pcm_f32: Vec<f32>,
    pcm_s16: Vec<i16>,
}

impl SyntheticEngine {
    pub fn new(config: SyntheticConfig) -> Self {
        let mb_width = ((config.width + 15) >> 4) as usize;
        let mb_height = ((config.height + 15) >> 4) as usize;
        let luma_stride = mb_width << 4;
        let chroma_stride = mb_width << 3;

        info!(
            "🧪 测试图案引擎: {}x{} @ {} fps, {} Hz, 时长 {:.1}s",
            config.width, config.height, config.framerate, config.sample_rate, config.duration
        );

        Self {
            video_enabled: config.has_video,
            audio_enabled: config.sample_rate > 0,
            video_callback: None,
            audio_callback: None,
            lead_time: 0.0,
            audio_output: AudioSpec {
                sample_rate: config.sample_rate,
                channels: 2,
                format: SampleFormat::F32,
            },
            time: 0.0,
            next_frame: 0,
            next_sample: 0,
            ended: false,
            luma_stride,
            chroma_stride,
            planes: [
                vec![16; luma_stride * (mb_height << 4)],
                vec![128; chroma_stride * (mb_height << 3)],
                vec![128; chroma_stride * (mb_height << 3)],
            ],
            pcm_f32: Vec::new(),
            pcm_s16: Vec::new(),
            config,
        }
    }

    fn video_active(&self) -> bool {
        self.config.has_video && self.video_enabled
    }

    fn audio_active(&self) -> bool {
        self.config.sample_rate > 0 && self.audio_enabled
    }

    fn frame_time(&self, index: u64) -> f64 {
        index as f64 / self.config.framerate
    }

    fn sample_time(&self, index: u64) -> f64 {
        index as f64 / self.audio_output.sample_rate as f64
    }

    fn video_exhausted(&self) -> bool {
        self.frame_time(self.next_frame) >= self.config.duration - EPSILON
    }

    fn audio_exhausted(&self) -> bool {
        self.sample_time(self.next_sample) >= self.config.duration - EPSILON
    }

    fn render_pattern(&mut self, index: u64) {
        let shift = (index * 4) as usize;
        let luma_rows = self.planes[0].len() / self.luma_stride;
        for row in 0..luma_rows {
            let line = &mut self.planes[0][row * self.luma_stride..(row + 1) * self.luma_stride];
            for (x, px) in line.iter_mut().enumerate() {
                *px = ((x + row + shift) & 0xff) as u8;
            }
        }
        let cb = (64 + (index % 128)) as u8;
        let cr = (192 - (index % 128)) as u8;
        self.planes[1].fill(cb);
        self.planes[2].fill(cr);
    }

    fn emit_video(&mut self) {
        let index = self.next_frame;
        self.next_frame += 1;
        self.render_pattern(index);

        let chroma_width = (self.config.width + 1) / 2;
        let chroma_height = (self.config.height + 1) / 2;
        let frame = PlanarFrame {
            time: self.frame_time(index),
            width: self.config.width,
            height: self.config.height,
            y: Plane {
                width: self.config.width,
                height: self.config.height,
                stride: self.luma_stride,
                data: &self.planes[0],
            },
            cb: Plane {
                width: chroma_width,
                height: chroma_height,
                stride: self.chroma_stride,
                data: &self.planes[1],
            },
            cr: Plane {
                width: chroma_width,
                height: chroma_height,
                stride: self.chroma_stride,
                data: &self.planes[2],
            },
        };
        if let Some(callback) = self.video_callback.as_mut() {
            callback(&frame);
        }
    }

    fn emit_audio(&mut self) {
        let start = self.next_sample;
        let rate = self.audio_output.sample_rate as f64;
        let channels = self.audio_output.channels as usize;
        let remaining = ((self.config.duration * rate).ceil() as u64).saturating_sub(start);
        let frames = remaining.min(SAMPLES_PER_FRAME as u64) as usize;
        self.next_sample += frames as u64;

        self.pcm_f32.clear();
        self.pcm_s16.clear();
        for i in 0..frames {
            let t = (start + i as u64) as f64 / rate;
            let value = (TAU * self.config.tone_hz * t).sin() * 0.25;
            match self.audio_output.format {
                SampleFormat::F32 => {
                    let v = value as f32;
                    self.pcm_f32.extend(std::iter::repeat(v).take(channels));
                }
                SampleFormat::S16 => {
                    let v = (value * 32767.0) as i16;
                    self.pcm_s16.extend(std::iter::repeat(v).take(channels));
                }
            }
        }

        let samples = match self.audio_output.format {
            SampleFormat::F32 => SampleData::F32(&self.pcm_f32),
            SampleFormat::S16 => SampleData::S16(&self.pcm_s16),
        };
        let chunk = AudioChunk {
            time: start as f64 / rate,
            frames,
            channels: self.audio_output.channels,
            samples,
        };
        if let Some(callback) = self.audio_callback.as_mut() {
            callback(&chunk);
        }
    }

    fn update_ended(&mut self) {
        let video_done = !self.video_active() || self.video_exhausted();
        let audio_done = !self.audio_active() || self.audio_exhausted();
        let time_done = self.time >= self.config.duration - EPSILON;
        self.ended = if self.video_active() || self.audio_active() {
            video_done && audio_done
        } else {
            time_done
        };
    }
}

impl DecodeEngine for SyntheticEngine {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            has_video: self.config.has_video,
            has_audio: self.config.sample_rate > 0,
            width: self.config.width,
            height: self.config.height,
            framerate: self.config.framerate,
            sample_rate: self.config.sample_rate,
            duration: Some(self.config.duration),
        }
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    fn set_video_callback(&mut self, callback: VideoCallback) {
        self.video_callback = Some(callback);
    }

    fn set_audio_callback(&mut self, callback: AudioCallback) {
        self.audio_callback = Some(callback);
    }

    fn set_audio_lead_time(&mut self, lead: Duration) {
        self.lead_time = lead.as_secs_f64();
    }

    fn set_audio_output(&mut self, output: AudioSpec) {
        if output.sample_rate == 0 || output.channels == 0 {
            warn!("忽略无效的音频输出规格: {:?}", output);
            return;
        }
        if self.config.sample_rate == 0 {
            return;
        }
        // 按新采样率换算已输出的位置
        let position = self.sample_time(self.next_sample);
        self.audio_output = output;
        self.next_sample = (position * output.sample_rate as f64).ceil() as u64;
        debug!("测试音输出: {:?}", output);
    }

    fn decode(&mut self, elapsed: Duration) {
        if self.ended {
            return;
        }

        let video_target = self.time + elapsed.as_secs_f64();
        let audio_target = video_target + self.lead_time;

        loop {
            let video_due = self.video_active()
                && !self.video_exhausted()
                && self.frame_time(self.next_frame) < video_target - EPSILON;
            let audio_due = self.audio_active()
                && !self.audio_exhausted()
                && self.sample_time(self.next_sample) < audio_target - EPSILON;

            if !video_due && !audio_due {
                break;
            }
            if video_due {
                self.emit_video();
            }
            if audio_due {
                self.emit_audio();
            }
        }

        self.time = video_target.min(self.config.duration);
        self.update_ended();
    }

    fn seek(&mut self, time: f64, exact: bool) -> bool {
        let target = time.clamp(0.0, self.config.duration);
        let mut frame = (target * self.config.framerate).floor() as u64;
        if !exact && self.config.gop > 0 {
            frame -= frame % self.config.gop;
        }
        let landed = if exact { target } else { self.frame_time(frame) };

        debug!("测试图案跳转: 请求 {:.3}s → {:.3}s (帧 {})", time, landed, frame);

        self.time = landed;
        self.next_frame = frame;
        self.next_sample = (landed * self.audio_output.sample_rate as f64).ceil() as u64;
        self.ended = false;

        if self.video_active() && !self.video_exhausted() {
            self.emit_video();
        }
        self.update_ended();
        true
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn has_ended(&self) -> bool {
        self.ended
    }
}
