use crate::core::{
    AudioChunk, MediaSource, PlanarFrame, Plane, PlayerError, Result, SampleData, SampleFormat,
    StreamInfo,
};
use crate::player::audio_output::AudioSpec;
use crate::player::engine::{AudioCallback, DecodeEngine, VideoCallback};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

const EPSILON: f64 = 1e-6;

/// FFmpeg 内部时间单位（微秒）
const AV_TIME_BASE: f64 = 1_000_000.0;

/// 已解码、等待到点输出的画面（YUV420P）
struct Picture {
    time: f64,
    frame: util::frame::Video,
}

/// 已重采样、等待到点输出的音频（交错排列）
struct Samples {
    time: f64,
    frames: usize,
    f32: Vec<f32>,
    s16: Vec<i16>,
}

struct VideoTrack {
    index: usize,
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    time_base: f64,
    frame_interval: f64,
    next_time: f64,
    packets: VecDeque<ffmpeg::Packet>,
    ready: VecDeque<Picture>,
    drained: bool,
}

impl VideoTrack {
    fn decode_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                self.decoder.flush();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.receive()
    }

    fn drain(&mut self) -> Result<()> {
        self.drained = true;
        self.decoder.send_eof()?;
        self.receive()
    }

    fn receive(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => self.push(decoded)?,
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("视频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, decoded: util::frame::Video) -> Result<()> {
        let time = match decoded.timestamp() {
            Some(ts) => ts as f64 * self.time_base,
            None => self.next_time,
        };
        self.next_time = time + self.frame_interval;

        let frame = if decoded.format() == util::format::Pixel::YUV420P {
            decoded
        } else {
            if self.scaler.is_none() {
                self.scaler = Some(software::scaling::Context::get(
                    decoded.format(),
                    decoded.width(),
                    decoded.height(),
                    util::format::Pixel::YUV420P,
                    decoded.width(),
                    decoded.height(),
                    software::scaling::Flags::BILINEAR,
                )?);
            }
            let mut converted = util::frame::Video::empty();
            if let Some(scaler) = self.scaler.as_mut() {
                scaler.run(&decoded, &mut converted)?;
            }
            converted
        };

        self.ready.push_back(Picture { time, frame });
        Ok(())
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.packets.clear();
        self.ready.clear();
        self.drained = false;
    }
}

/// 从重采样输出的字节里取前 `count` 个样本（本机字节序）
fn extend_samples<T: bytemuck::Pod>(out: &mut Vec<T>, bytes: &[u8], count: usize) {
    let size = std::mem::size_of::<T>();
    let bytes = &bytes[..(count * size).min(bytes.len())];
    match bytemuck::try_cast_slice::<u8, T>(bytes) {
        Ok(samples) => out.extend_from_slice(samples),
        // 未对齐或长度不整时逐个读
        Err(_) => out.extend(bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned::<T>)),
    }
}

struct AudioTrack {
    index: usize,
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    resampler_output: Option<AudioSpec>,
    time_base: f64,
    rate: u32,
    next_time: f64,
    packets: VecDeque<ffmpeg::Packet>,
    ready: VecDeque<Samples>,
    drained: bool,
}

impl AudioTrack {
    fn decode_packet(&mut self, packet: &ffmpeg::Packet, output: AudioSpec) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                self.decoder.flush();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.receive(output)
    }

    fn drain(&mut self, output: AudioSpec) -> Result<()> {
        self.drained = true;
        self.decoder.send_eof()?;
        self.receive(output)
    }

    fn receive(&mut self, output: AudioSpec) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => self.push(decoded, output)?,
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 重采样到设备提供的采样率、声道数和样本格式
    fn push(&mut self, decoded: util::frame::Audio, output: AudioSpec) -> Result<()> {
        if self.resampler.is_none() || self.resampler_output != Some(output) {
            let target = match output.format {
                SampleFormat::F32 => util::format::Sample::F32(util::format::sample::Type::Packed),
                SampleFormat::S16 => util::format::Sample::I16(util::format::sample::Type::Packed),
            };
            debug!(
                "初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch {:?}",
                decoded.rate(),
                decoded.channels(),
                output.sample_rate,
                output.channels,
                output.format
            );
            self.resampler = Some(software::resampling::Context::get(
                decoded.format(),
                decoded.channel_layout(),
                decoded.rate(),
                target,
                util::channel_layout::ChannelLayout::default(output.channels as i32),
                output.sample_rate,
            )?);
            self.resampler_output = Some(output);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(&decoded, &mut resampled)?;
        }

        let time = match decoded.timestamp() {
            Some(ts) => ts as f64 * self.time_base,
            None => self.next_time,
        };
        let frames = resampled.samples();
        self.next_time = time + frames as f64 / output.sample_rate.max(1) as f64;
        if frames == 0 {
            return Ok(());
        }

        let bytes = resampled.data(0);
        let count = frames * output.channels as usize;
        let mut samples = Samples {
            time,
            frames,
            f32: Vec::new(),
            s16: Vec::new(),
        };
        match output.format {
            SampleFormat::F32 => extend_samples(&mut samples.f32, bytes, count),
            SampleFormat::S16 => extend_samples(&mut samples.s16, bytes, count),
        }
        self.ready.push_back(samples);
        Ok(())
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.packets.clear();
        self.ready.clear();
        self.drained = false;
    }
}

/// 基于 FFmpeg 的解码引擎
///
/// 按媒体时间拉取：decode(dt) 把视频时钟推进 dt，输出所有时间戳落在新时钟之前的画面，
/// 音频则输出到视频时钟 + 提前量为止。
pub struct FfmpegEngine {
    input: format::context::Input,
    info: StreamInfo,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    video_enabled: bool,
    audio_enabled: bool,
    video_callback: Option<VideoCallback>,
    audio_callback: Option<AudioCallback>,
    lead: f64,
    audio_output: AudioSpec,
    time: f64,
    demux_done: bool,
}

impl FfmpegEngine {
    pub fn open(source: &MediaSource) -> Result<Self> {
        ffmpeg::init()?;
        let location = source.location();
        info!("正在打开: {}", location);

        let input = if source.is_network_stream() {
            info!("🌐 网络流，启用超时与重连");
            let mut options = ffmpeg::Dictionary::new();
            options.set("timeout", "15000000");
            options.set("rw_timeout", "8000000");
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");
            format::input_with_dictionary(&location, options)
                .map_err(|e| PlayerError::OpenError(format!("无法打开网络流: {}", e)))?
        } else {
            format::input(&location)
                .map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)))?
        };

        let video = match input.streams().best(media::Type::Video) {
            Some(stream) => {
                let index = stream.index();
                let time_base = f64::from(stream.time_base());
                let mut framerate = f64::from(stream.avg_frame_rate());
                if !(framerate.is_finite() && framerate > 0.0) {
                    framerate = f64::from(stream.rate());
                }
                let context = codec::context::Context::from_parameters(stream.parameters())?;
                let decoder = context.decoder().video()?;
                Some((
                    VideoTrack {
                        index,
                        decoder,
                        scaler: None,
                        time_base,
                        frame_interval: if framerate > 0.0 { 1.0 / framerate } else { 0.0 },
                        next_time: 0.0,
                        packets: VecDeque::new(),
                        ready: VecDeque::new(),
                        drained: false,
                    },
                    framerate,
                ))
            }
            None => None,
        };

        let audio = match input.streams().best(media::Type::Audio) {
            Some(stream) => {
                let index = stream.index();
                let time_base = f64::from(stream.time_base());
                let context = codec::context::Context::from_parameters(stream.parameters())?;
                let decoder = context.decoder().audio()?;
                let rate = decoder.rate();
                Some(AudioTrack {
                    index,
                    decoder,
                    resampler: None,
                    resampler_output: None,
                    time_base,
                    rate,
                    next_time: 0.0,
                    packets: VecDeque::new(),
                    ready: VecDeque::new(),
                    drained: false,
                })
            }
            None => None,
        };

        if video.is_none() && audio.is_none() {
            return Err(PlayerError::NoStream);
        }

        let duration = if input.duration() > 0 {
            Some(input.duration() as f64 / AV_TIME_BASE)
        } else {
            None
        };

        let info = StreamInfo {
            has_video: video.is_some(),
            has_audio: audio.is_some(),
            width: video.as_ref().map_or(0, |(v, _)| v.decoder.width()),
            height: video.as_ref().map_or(0, |(v, _)| v.decoder.height()),
            framerate: video.as_ref().map_or(0.0, |(_, fps)| *fps),
            sample_rate: audio.as_ref().map_or(0, |a| a.rate),
            duration,
        };

        info!(
            "📊 媒体信息: {}x{} @ {:.3} fps, 音频 {} Hz, 时长 {}",
            info.width,
            info.height,
            info.framerate,
            info.sample_rate,
            duration.map_or_else(|| "未知".to_string(), |d| format!("{:.1}s", d))
        );

        Ok(Self {
            input,
            info,
            video: video.map(|(track, _)| track),
            audio,
            video_enabled: true,
            audio_enabled: true,
            video_callback: None,
            audio_callback: None,
            lead: 0.0,
            audio_output: AudioSpec {
                sample_rate: info.sample_rate,
                channels: 2,
                format: SampleFormat::F32,
            },
            time: 0.0,
            demux_done: false,
        })
    }

    /// 读一个包放进对应轨道的队列；输入结束时返回 false
    fn read_packet(&mut self) -> bool {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                let index = packet.stream();
                if let Some(video) = self.video.as_mut().filter(|v| v.index == index) {
                    if self.video_enabled {
                        video.packets.push_back(packet);
                    }
                } else if let Some(audio) = self.audio.as_mut().filter(|a| a.index == index) {
                    if self.audio_enabled {
                        audio.packets.push_back(packet);
                    }
                }
                true
            }
            Err(ffmpeg::Error::Eof) => {
                self.demux_done = true;
                false
            }
            Err(e) => {
                warn!("读取数据包失败，视为输入结束: {}", e);
                self.demux_done = true;
                false
            }
        }
    }

    /// 保证视频队列里至少有一帧；没有更多画面时返回 false
    fn fill_video(&mut self) -> bool {
        loop {
            let Some(video) = self.video.as_mut() else {
                return false;
            };
            if !video.ready.is_empty() {
                return true;
            }
            if let Some(packet) = video.packets.pop_front() {
                if let Err(e) = video.decode_packet(&packet) {
                    warn!("视频包解码失败: {}", e);
                }
                continue;
            }
            if video.drained {
                return false;
            }
            if self.demux_done {
                if let Err(e) = video.drain() {
                    debug!("视频解码器冲刷: {}", e);
                }
                continue;
            }
            self.read_packet();
        }
    }

    fn fill_audio(&mut self) -> bool {
        let output = self.audio_output;
        loop {
            let Some(audio) = self.audio.as_mut() else {
                return false;
            };
            if !audio.ready.is_empty() {
                return true;
            }
            if let Some(packet) = audio.packets.pop_front() {
                if let Err(e) = audio.decode_packet(&packet, output) {
                    warn!("音频包解码失败: {}", e);
                }
                continue;
            }
            if audio.drained {
                return false;
            }
            if self.demux_done {
                if let Err(e) = audio.drain(output) {
                    debug!("音频解码器冲刷: {}", e);
                }
                continue;
            }
            self.read_packet();
        }
    }

    fn video_active(&self) -> bool {
        self.video.is_some() && self.video_enabled
    }

    fn audio_active(&self) -> bool {
        self.audio.is_some() && self.audio_enabled
    }

    fn emit_video(&mut self) {
        let Some(picture) = self.video.as_mut().and_then(|v| v.ready.pop_front()) else {
            return;
        };
        let Some(callback) = self.video_callback.as_mut() else {
            return;
        };
        let frame = &picture.frame;
        let (width, height) = (frame.width(), frame.height());
        let (chroma_width, chroma_height) = ((width + 1) / 2, (height + 1) / 2);
        let planar = PlanarFrame {
            time: picture.time,
            width,
            height,
            y: Plane {
                width,
                height,
                stride: frame.stride(0),
                data: frame.data(0),
            },
            cb: Plane {
                width: chroma_width,
                height: chroma_height,
                stride: frame.stride(1),
                data: frame.data(1),
            },
            cr: Plane {
                width: chroma_width,
                height: chroma_height,
                stride: frame.stride(2),
                data: frame.data(2),
            },
        };
        callback(&planar);
    }

    fn emit_audio(&mut self) {
        let Some(samples) = self.audio.as_mut().and_then(|a| a.ready.pop_front()) else {
            return;
        };
        let Some(callback) = self.audio_callback.as_mut() else {
            return;
        };
        let data = match self.audio_output.format {
            SampleFormat::F32 => SampleData::F32(&samples.f32),
            SampleFormat::S16 => SampleData::S16(&samples.s16),
        };
        callback(&AudioChunk {
            time: samples.time,
            frames: samples.frames,
            channels: self.audio_output.channels,
            samples: data,
        });
    }

    fn front_video_time(&self) -> Option<f64> {
        self.video.as_ref().and_then(|v| v.ready.front()).map(|p| p.time)
    }

    fn front_audio_time(&self) -> Option<f64> {
        self.audio.as_ref().and_then(|a| a.ready.front()).map(|s| s.time)
    }
}

impl DecodeEngine for FfmpegEngine {
    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
        if !enabled {
            if let Some(video) = self.video.as_mut() {
                video.packets.clear();
                video.ready.clear();
            }
        }
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        if !enabled {
            if let Some(audio) = self.audio.as_mut() {
                audio.packets.clear();
                audio.ready.clear();
            }
        }
    }

    fn set_video_callback(&mut self, callback: VideoCallback) {
        self.video_callback = Some(callback);
    }

    fn set_audio_callback(&mut self, callback: AudioCallback) {
        self.audio_callback = Some(callback);
    }

    fn set_audio_lead_time(&mut self, lead: Duration) {
        self.lead = lead.as_secs_f64();
    }

    fn set_audio_output(&mut self, output: AudioSpec) {
        if output.sample_rate == 0 || output.channels == 0 {
            warn!("忽略无效的音频输出规格: {:?}", output);
            return;
        }
        if let Some(audio) = self.audio.as_mut() {
            // 已解码的样本按旧规格重采样，丢掉
            audio.ready.clear();
        }
        self.audio_output = output;
    }

    fn decode(&mut self, elapsed: Duration) {
        let video_target = self.time + elapsed.as_secs_f64();
        let audio_target = video_target + self.lead;

        loop {
            let video_due = self.video_active()
                && self.fill_video()
                && self.front_video_time().map_or(false, |t| t < video_target - EPSILON);
            let audio_due = self.audio_active()
                && self.fill_audio()
                && self.front_audio_time().map_or(false, |t| t < audio_target - EPSILON);

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

        self.time = video_target;
    }

    fn seek(&mut self, time: f64, exact: bool) -> bool {
        let target = time.max(0.0);
        let ts = (target * AV_TIME_BASE) as i64;
        if let Err(e) = self.input.seek(ts, ..ts) {
            warn!("跳转到 {:.3}s 失败: {}", target, e);
            return false;
        }

        if let Some(video) = self.video.as_mut() {
            video.reset();
            video.next_time = target;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.reset();
            audio.next_time = target;
        }
        self.demux_done = false;

        // 关键帧之前的画面和已经过时的音频直接丢掉
        let mut landed = target;
        if self.video_active() && self.fill_video() {
            if exact {
                while self.front_video_time().map_or(false, |t| t < target - EPSILON) {
                    if let Some(video) = self.video.as_mut() {
                        video.ready.pop_front();
                    }
                    if !self.fill_video() {
                        break;
                    }
                }
            }
            if let Some(t) = self.front_video_time() {
                landed = t;
            }
            self.emit_video();
        }
        while self.audio_active()
            && self.fill_audio()
            && self.front_audio_time().map_or(false, |t| t < landed - EPSILON)
        {
            if let Some(audio) = self.audio.as_mut() {
                audio.ready.pop_front();
            }
        }

        debug!("跳转: 请求 {:.3}s → {:.3}s", time, landed);
        self.time = landed;
        true
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn has_ended(&self) -> bool {
        if !self.demux_done {
            return false;
        }
        let video_done = self.video.as_ref().map_or(true, |v| {
            !self.video_enabled || (v.drained && v.ready.is_empty() && v.packets.is_empty())
        });
        let audio_done = self.audio.as_ref().map_or(true, |a| {
            !self.audio_enabled || (a.drained && a.ready.is_empty() && a.packets.is_empty())
        });
        video_done && audio_done
    }
}
