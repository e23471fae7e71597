use crate::core::{PlanarFrame, PlayerError, Result, SampleData, SampleFormat};
use crate::player::audio_output::{AudioDevice, AudioSpec};
use crate::player::control::{ControlEvent, EventSource, Key};
use crate::renderer::YuvTarget;
use log::{debug, info, warn};
use sdl2::audio::{AudioFormat, AudioQueue, AudioSpecDesired};
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Scancode;
use sdl2::mouse::MouseUtil;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, Texture};
use sdl2::video::{FullscreenType, Window};
use sdl2::{AudioSubsystem, EventPump, Sdl, VideoSubsystem};
use std::thread;
use std::time::{Duration, Instant};

fn sdl_err(e: impl std::fmt::Display) -> PlayerError {
    PlayerError::DisplayError(e.to_string())
}

/// 扫描码 → 按键
pub fn key_from_scancode(scancode: Scancode) -> Key {
    match scancode {
        Scancode::Q => Key::Q,
        Scancode::Escape => Key::Escape,
        Scancode::Space => Key::Space,
        Scancode::P => Key::P,
        Scancode::F => Key::F,
        Scancode::F11 => Key::F11,
        Scancode::Left => Key::Left,
        Scancode::Right => Key::Right,
        _ => Key::Other,
    }
}

/// SDL 上下文
pub struct SdlContext {
    sdl: Sdl,
    video: VideoSubsystem,
}

impl SdlContext {
    pub fn init() -> Result<Self> {
        let sdl = sdl2::init().map_err(sdl_err)?;
        let video = sdl.video().map_err(sdl_err)?;
        debug!("SDL 已初始化");
        Ok(Self { sdl, video })
    }

    /// 创建窗口与流式 IYUV 纹理，present 与垂直同步对齐
    pub fn texture(&self, title: &str, width: u32, height: u32) -> Result<SdlTexture> {
        let window = self
            .video
            .window(title, width, height)
            .position_centered()
            .resizable()
            .build()
            .map_err(sdl_err)?;
        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(sdl_err)?;
        let texture = canvas
            .texture_creator()
            .create_texture_streaming(PixelFormatEnum::IYUV, width, height)
            .map_err(sdl_err)?;

        info!("🪟 SDL 窗口已创建: {}x{}", width, height);
        Ok(SdlTexture {
            canvas,
            texture: Some(texture),
            mouse: self.sdl.mouse(),
            height: height as usize,
        })
    }

    pub fn events(&self, seek_step: f64) -> Result<SdlEvents> {
        Ok(SdlEvents {
            pump: self.sdl.event_pump().map_err(sdl_err)?,
            seek_step,
        })
    }

    pub fn audio(&self, requested: AudioSpec) -> Result<SdlAudioDevice> {
        let subsystem = self.sdl.audio().map_err(sdl_err)?;
        SdlAudioDevice::open(&subsystem, requested)
    }
}

/// 原生 YUV 纹理输出
pub struct SdlTexture {
    canvas: Canvas<Window>,
    texture: Option<Texture>,
    mouse: MouseUtil,
    height: usize,
}

impl YuvTarget for SdlTexture {
    fn update_yuv(&mut self, frame: &PlanarFrame<'_>) -> Result<()> {
        let Some(texture) = self.texture.as_mut() else {
            return Err(PlayerError::DisplayError("纹理已销毁".to_string()));
        };
        // 按纹理高度截取各平面，去掉宏块填充行
        let h = self.height;
        let y_len = frame.y.stride * h;
        let u_len = frame.cb.stride * h / 2;
        let v_len = frame.cr.stride * h / 2;
        let (Some(y), Some(u), Some(v)) = (
            frame.y.data.get(..y_len),
            frame.cb.data.get(..u_len),
            frame.cr.data.get(..v_len),
        ) else {
            return Err(PlayerError::DisplayError("平面数据长度不足".to_string()));
        };
        texture
            .update_yuv(None, y, frame.y.stride, u, frame.cb.stride, v, frame.cr.stride)
            .map_err(sdl_err)
    }

    fn render(&mut self) -> Result<()> {
        let Some(texture) = self.texture.as_ref() else {
            return Ok(());
        };
        self.canvas.clear();
        self.canvas.copy(texture, None, None).map_err(sdl_err)?;
        self.canvas.present();
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        let mode = if fullscreen {
            FullscreenType::Desktop
        } else {
            FullscreenType::Off
        };
        self.canvas
            .window_mut()
            .set_fullscreen(mode)
            .map_err(sdl_err)?;
        self.mouse.show_cursor(!fullscreen);
        info!("{}", if fullscreen { "⛶ 进入全屏" } else { "退出全屏" });
        Ok(())
    }
}

impl Drop for SdlTexture {
    fn drop(&mut self) {
        if let Some(texture) = self.texture.take() {
            // SAFETY: 纹理由本结构体的 canvas 创建，此时 canvas 仍然存活
            unsafe { texture.destroy() };
        }
    }
}

/// SDL 事件泵，每个 tick 取空
pub struct SdlEvents {
    pump: EventPump,
    seek_step: f64,
}

impl EventSource for SdlEvents {
    fn poll(&mut self, out: &mut Vec<ControlEvent>) {
        for event in self.pump.poll_iter() {
            let control = match event {
                Event::Quit { .. } => Some(ControlEvent::Quit),
                Event::KeyDown {
                    scancode: Some(scancode),
                    repeat: false,
                    ..
                } => ControlEvent::from_key(key_from_scancode(scancode), self.seek_step),
                Event::MouseButtonDown { clicks: 2, .. } => Some(ControlEvent::ToggleFullscreen),
                Event::Window { win_event, .. } => match win_event {
                    WindowEvent::Resized(w, h) | WindowEvent::SizeChanged(w, h) => {
                        Some(ControlEvent::Resize {
                            width: w.max(0) as u32,
                            height: h.max(0) as u32,
                        })
                    }
                    WindowEvent::Exposed => Some(ControlEvent::Expose),
                    WindowEvent::Hidden | WindowEvent::Minimized => {
                        Some(ControlEvent::Visibility(false))
                    }
                    WindowEvent::Shown | WindowEvent::Restored => {
                        Some(ControlEvent::Visibility(true))
                    }
                    _ => None,
                },
                _ => None,
            };
            out.extend(control);
        }
    }
}

enum Queue {
    F32(AudioQueue<f32>),
    S16(AudioQueue<i16>),
}

/// SDL 音频队列
pub struct SdlAudioDevice {
    queue: Option<Queue>,
    spec: AudioSpec,
    /// 队列中允许堆积的字节数
    max_queued: u32,
}

/// 最多等待设备消化的时间
const MAX_BACKPRESSURE_WAIT: Duration = Duration::from_millis(100);

impl SdlAudioDevice {
    fn open(subsystem: &AudioSubsystem, requested: AudioSpec) -> Result<Self> {
        let desired = AudioSpecDesired {
            freq: Some(requested.sample_rate as i32),
            channels: Some(requested.channels as u8),
            samples: None,
        };
        let audio_err = |e: String| PlayerError::AudioError(e);

        let (queue, served) = match requested.format {
            SampleFormat::F32 => {
                let queue = subsystem
                    .open_queue::<f32, _>(None, &desired)
                    .map_err(audio_err)?;
                let served = served_spec(&queue);
                queue.resume();
                (Queue::F32(queue), served)
            }
            SampleFormat::S16 => {
                let queue = subsystem
                    .open_queue::<i16, _>(None, &desired)
                    .map_err(audio_err)?;
                let served = served_spec(&queue);
                queue.resume();
                (Queue::S16(queue), served)
            }
        };

        let (freq, channels, served_format, buffer_samples) = served;
        let format = match served_format {
            AudioFormat::S16LSB | AudioFormat::S16MSB => SampleFormat::S16,
            _ => SampleFormat::F32,
        };
        let spec = AudioSpec {
            sample_rate: freq.max(0) as u32,
            channels: channels as u16,
            format,
        };
        // 大约 0.5 秒
        let max_queued =
            spec.sample_rate * spec.channels as u32 * format.bytes_per_sample() as u32 / 2;

        debug!("SDL 音频设备: {:?}, 缓冲 {} 样本", spec, buffer_samples);
        Ok(Self {
            queue: Some(queue),
            spec,
            max_queued,
        })
    }

    fn queued_bytes(&self) -> u32 {
        match &self.queue {
            Some(Queue::F32(q)) => q.size(),
            Some(Queue::S16(q)) => q.size(),
            None => 0,
        }
    }
}

fn served_spec<T: sdl2::audio::AudioFormatNum>(queue: &AudioQueue<T>) -> (i32, u8, AudioFormat, u16) {
    let spec = queue.spec();
    (spec.freq, spec.channels, spec.format, spec.samples)
}

impl AudioDevice for SdlAudioDevice {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn put(&mut self, samples: &SampleData<'_>) -> Result<()> {
        let deadline = Instant::now() + MAX_BACKPRESSURE_WAIT;
        while self.queued_bytes() > self.max_queued && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        match (&self.queue, samples) {
            (Some(Queue::F32(q)), SampleData::F32(s)) => {
                q.queue_audio(s).map_err(PlayerError::AudioError)
            }
            (Some(Queue::S16(q)), SampleData::S16(s)) => {
                q.queue_audio(s).map_err(PlayerError::AudioError)
            }
            (Some(_), other) => Err(PlayerError::AudioError(format!(
                "样本格式 {:?} 与设备不一致",
                other.format()
            ))),
            (None, _) => Err(PlayerError::AudioError("音频设备已关闭".to_string())),
        }
    }

    fn clear(&mut self) -> Result<()> {
        match &self.queue {
            Some(Queue::F32(q)) => q.clear(),
            Some(Queue::S16(q)) => q.clear(),
            None => warn!("清空已关闭的音频设备"),
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.queue.take().is_some() {
            debug!("SDL 音频设备已关闭");
        }
    }
}
