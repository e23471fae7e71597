use crate::core::{should_log, AudioChunk, PlayerError, Result, SampleData, SampleFormat};
use log::{debug, info, warn};
use std::time::Duration;

/// 音频流规格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// 音频设备接口
///
/// 设备在打开时完成协商，`spec()` 返回设备实际服务的规格（可能和请求不同）。
pub trait AudioDevice {
    /// 实际生效的规格
    fn spec(&self) -> AudioSpec;

    /// 写入交错样本；缓冲区满时允许短暂阻塞
    fn put(&mut self, samples: &SampleData<'_>) -> Result<()>;

    /// 丢弃已缓冲但尚未播放的样本
    fn clear(&mut self) -> Result<()>;

    fn close(&mut self);
}

/// 音频提前量 = 每帧样本数 / 采样率
pub fn lead_time(samples_per_frame: u32, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples_per_frame as f64 / sample_rate as f64)
}

/// 音频写入统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub chunks_written: u64,
    pub chunks_dropped: u64,
    pub clears: u64,
}

/// 音频输出端
///
/// 在 decode 期间由音频回调同步调用；写入失败只记录日志并丢弃该块。
pub struct AudioSink {
    device: Box<dyn AudioDevice>,
    requested: AudioSpec,
    lead_time: Duration,
    stats: AudioStats,
    error_log_every: u64,
    closed: bool,
}

impl AudioSink {
    /// 在已打开的设备上建立输出端，记录请求与实际规格的差异
    pub fn open(
        device: Box<dyn AudioDevice>,
        requested: AudioSpec,
        samples_per_frame: u32,
    ) -> Result<Self> {
        let served = device.spec();
        if served.channels == 0 || served.sample_rate == 0 {
            return Err(PlayerError::AudioError(format!(
                "设备返回了无效规格: {:?}",
                served
            )));
        }

        if served != requested {
            warn!(
                "⚠️  音频设备规格与请求不一致: 请求 {} Hz/{} 声道/{:?}, 实际 {} Hz/{} 声道/{:?}",
                requested.sample_rate,
                requested.channels,
                requested.format,
                served.sample_rate,
                served.channels,
                served.format
            );
        }

        let lead_time = lead_time(samples_per_frame, requested.sample_rate);
        info!(
            "🔊 音频输出就绪: {} Hz, {} 声道, {:?}, 提前量 {:.1}ms",
            served.sample_rate,
            served.channels,
            served.format,
            lead_time.as_secs_f64() * 1000.0
        );

        Ok(Self {
            device,
            requested,
            lead_time,
            stats: AudioStats::default(),
            error_log_every: 50,
            closed: false,
        })
    }

    pub fn with_error_log_every(mut self, every: u64) -> Self {
        self.error_log_every = every.max(1);
        self
    }

    pub fn lead_time(&self) -> Duration {
        self.lead_time
    }

    /// 设备实际提供的规格，解码引擎应按它输出
    pub fn served(&self) -> AudioSpec {
        self.device.spec()
    }

    pub fn requested(&self) -> AudioSpec {
        self.requested
    }

    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    /// 写入一块样本，失败不向上传播
    pub fn write(&mut self, chunk: &AudioChunk<'_>) {
        if self.closed || chunk.samples.is_empty() {
            return;
        }
        match self.device.put(&chunk.samples) {
            Ok(()) => {
                self.stats.chunks_written += 1;
            }
            Err(e) => {
                self.stats.chunks_dropped += 1;
                let dropped = self.stats.chunks_dropped;
                if should_log(dropped, self.error_log_every) {
                    warn!("音频写入失败（已丢弃 {} 块）: {}", dropped, e);
                }
            }
        }
    }

    /// 清空设备缓冲（跳转时调用）
    pub fn clear(&mut self) {
        if self.closed {
            return;
        }
        self.stats.clears += 1;
        if let Err(e) = self.device.clear() {
            warn!("清空音频缓冲失败: {}", e);
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.device.close();
            debug!("音频输出已关闭: {:?}", self.stats);
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "cpal")]
pub use cpal_device::CpalDevice;

#[cfg(feature = "cpal")]
mod cpal_device {
    use super::{AudioDevice, AudioSpec};
    use crate::core::{PlayerError, Result, SampleData, SampleFormat};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use crossbeam::queue::SegQueue;
    use log::{debug, error, info, warn};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// 最多等待设备消化的时间，超过就放弃背压直接入队
    const MAX_BACKPRESSURE_WAIT: Duration = Duration::from_millis(100);

    /// cpal 音频设备 - 回调线程从无锁队列取样本
    pub struct CpalDevice {
        device: Device,
        config: StreamConfig,
        stream: Option<Stream>,
        buffer: Arc<SegQueue<f32>>,
        /// 队列中允许堆积的样本上限（所有声道）
        max_queued: usize,
        scratch: Vec<f32>,
    }

    impl CpalDevice {
        /// 打开默认输出设备（不支持请求配置时回退到常见配置）
        pub fn open(requested: AudioSpec) -> Result<Self> {
            info!(
                "初始化音频输出: {} Hz, {} 声道",
                requested.sample_rate, requested.channels
            );

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let wanted = StreamConfig {
                channels: requested.channels,
                sample_rate: cpal::SampleRate(requested.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let config = if Self::supports(&device, &wanted)? {
                wanted
            } else {
                warn!(
                    "⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置",
                    requested.sample_rate, requested.channels
                );
                let fallback = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
                let mut chosen = None;
                for (rate, channels) in fallback {
                    let candidate = StreamConfig {
                        channels,
                        sample_rate: cpal::SampleRate(rate),
                        buffer_size: cpal::BufferSize::Default,
                    };
                    if Self::supports(&device, &candidate)? {
                        info!("✅ 使用回退配置: {} Hz, {} 声道", rate, channels);
                        chosen = Some(candidate);
                        break;
                    }
                }
                chosen.ok_or_else(|| {
                    PlayerError::AudioError(format!(
                        "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                        requested.sample_rate, requested.channels
                    ))
                })?
            };

            // 大约 0.5 秒的样本量
            let max_queued = config.sample_rate.0 as usize * config.channels as usize / 2;

            let mut output = Self {
                device,
                config,
                stream: None,
                buffer: Arc::new(SegQueue::new()),
                max_queued,
                scratch: Vec::new(),
            };
            output.start()?;
            Ok(output)
        }

        fn supports(device: &Device, config: &StreamConfig) -> Result<bool> {
            let supported = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
            Ok(supported
                .into_iter()
                .any(|range| Self::is_config_compatible(config, &range)))
        }

        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;
            rate_in_range && config.channels == supported.channels()
        }

        fn start(&mut self) -> Result<()> {
            let buffer = self.buffer.clone();
            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for sample in data.iter_mut() {
                            *sample = buffer.pop().unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

            self.stream = Some(stream);
            info!("音频输出已启动");
            Ok(())
        }
    }

    impl AudioDevice for CpalDevice {
        fn spec(&self) -> AudioSpec {
            AudioSpec {
                sample_rate: self.config.sample_rate.0,
                channels: self.config.channels,
                format: SampleFormat::F32,
            }
        }

        fn put(&mut self, samples: &SampleData<'_>) -> Result<()> {
            if self.stream.is_none() {
                return Err(PlayerError::AudioError("音频流未启动".to_string()));
            }

            // 背压：设备积压过多时等它消化一部分
            let deadline = Instant::now() + MAX_BACKPRESSURE_WAIT;
            while self.buffer.len() > self.max_queued && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }

            self.scratch.clear();
            samples.extend_f32(&mut self.scratch);
            for &sample in &self.scratch {
                self.buffer.push(sample);
            }
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            while self.buffer.pop().is_some() {}
            Ok(())
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                drop(stream);
                info!("音频输出已停止");
            }
        }
    }

    impl Drop for CpalDevice {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FlakyDevice {
        spec: AudioSpec,
        fail_every: usize,
        calls: usize,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl AudioDevice for FlakyDevice {
        fn spec(&self) -> AudioSpec {
            self.spec
        }

        fn put(&mut self, samples: &SampleData<'_>) -> Result<()> {
            self.calls += 1;
            if self.fail_every > 0 && self.calls % self.fail_every == 0 {
                return Err(PlayerError::AudioError("underrun".to_string()));
            }
            self.log.lock().push(format!("put {}", samples.len()));
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.log.lock().push("clear".to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().push("close".to_string());
        }
    }

    fn spec(rate: u32) -> AudioSpec {
        AudioSpec {
            sample_rate: rate,
            channels: 2,
            format: SampleFormat::F32,
        }
    }

    #[test]
    fn test_lead_time() {
        let lead = lead_time(1152, 44100);
        assert!((lead.as_secs_f64() - 0.026122).abs() < 1e-5);
        assert_eq!(lead_time(1152, 0), Duration::ZERO);
    }

    #[test]
    fn test_write_errors_are_counted_not_propagated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let device = FlakyDevice {
            spec: spec(44100),
            fail_every: 2,
            calls: 0,
            log: log.clone(),
        };
        let mut sink = AudioSink::open(Box::new(device), spec(44100), 1152).unwrap();
        let data = [0.0f32; 8];
        let chunk = AudioChunk {
            time: 0.0,
            frames: 4,
            channels: 2,
            samples: SampleData::F32(&data),
        };
        for _ in 0..4 {
            sink.write(&chunk);
        }
        assert_eq!(sink.stats().chunks_written, 2);
        assert_eq!(sink.stats().chunks_dropped, 2);
    }

    #[test]
    fn test_mismatched_spec_is_not_fatal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let device = FlakyDevice {
            spec: spec(48000),
            fail_every: 0,
            calls: 0,
            log: log.clone(),
        };
        let sink = AudioSink::open(Box::new(device), spec(44100), 1152).unwrap();
        // 提前量按流的采样率算
        assert_eq!(sink.lead_time(), lead_time(1152, 44100));
    }

    #[test]
    fn test_close_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let device = FlakyDevice {
            spec: spec(44100),
            fail_every: 0,
            calls: 0,
            log: log.clone(),
        };
        let mut sink = AudioSink::open(Box::new(device), spec(44100), 1152).unwrap();
        sink.clear();
        sink.close();
        drop(sink);
        assert_eq!(*log.lock(), vec!["clear".to_string(), "close".to_string()]);
    }
}
