use crate::core::{
    should_log, Pacing, PlayerConfig, PlayerError, Result, StreamInfo, SystemClock, WallClock,
};
use crate::player::audio_output::{AudioSink, AudioStats};
use crate::player::control::{ControlState, EventSource, NoEvents};
use crate::player::engine::DecodeEngine;
use crate::player::pacer::{Pacer, PacerStats, TickContext, TickOutcome};
use crate::renderer::{PresentStats, PresentationStrategy, StrategyKind};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 呈现策略在解码回调与节拍器之间共享
pub type SharedPresenter = Arc<Mutex<Box<dyn PresentationStrategy>>>;

/// 音频输出端在音频回调与节拍器之间共享
pub type SharedAudio = Arc<Mutex<AudioSink>>;

/// 一次播放的统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStats {
    pub pacer: PacerStats,
    pub present: PresentStats,
    pub audio: AudioStats,
    pub prepare_errors: u64,
    /// 结束时的媒体时间（秒）
    pub media_time: f64,
}

/// 播放会话
///
/// 持有解码引擎、呈现策略、音频输出和控制状态。视频尺寸、帧率、采样率
/// 与音视频开关在构建后不再改变；显示尺寸随窗口变化。
pub struct Session {
    info: StreamInfo,
    display_size: (u32, u32),
    control: ControlState,
    engine: Box<dyn DecodeEngine>,
    presenter: Option<SharedPresenter>,
    presenter_kind: Option<StrategyKind>,
    audio: Option<SharedAudio>,
    events: Box<dyn EventSource>,
    pacer: Pacer,
    prepare_errors: Arc<AtomicU64>,
}

impl Session {
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    pub fn presenter_kind(&self) -> Option<StrategyKind> {
        self.presenter_kind
    }

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    /// 执行一个 tick
    pub fn tick(&mut self) -> TickOutcome {
        self.pacer.tick(TickContext {
            engine: self.engine.as_mut(),
            control: &mut self.control,
            events: self.events.as_mut(),
            presenter: self.presenter.as_ref(),
            audio: self.audio.as_ref(),
            display_size: &mut self.display_size,
            duration: self.info.duration,
            has_video: self.info.has_video,
        })
    }

    /// 等到下一个 tick
    pub fn wait_next(&mut self, outcome: TickOutcome) {
        self.pacer.wait_next(outcome);
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            pacer: self.pacer.stats(),
            present: self
                .presenter
                .as_ref()
                .map(|p| p.lock().stats())
                .unwrap_or_default(),
            audio: self
                .audio
                .as_ref()
                .map(|a| a.lock().stats())
                .unwrap_or_default(),
            prepare_errors: self.prepare_errors.load(Ordering::Relaxed),
            media_time: self.engine.current_time(),
        }
    }

    /// 按固定顺序释放资源：先呈现端（共享缓冲 detach/free、端口），再关音频
    fn shutdown(mut self) -> PlaybackStats {
        let stats = self.stats();

        // 回调持有呈现端和音频的引用，先禁用并替换掉
        self.engine.set_video_enabled(false);
        self.engine.set_audio_enabled(false);
        self.engine.set_video_callback(Box::new(|_| {}));
        self.engine.set_audio_callback(Box::new(|_| {}));

        if let Some(presenter) = self.presenter.take() {
            match Arc::try_unwrap(presenter) {
                Ok(presenter) => drop(presenter.into_inner()),
                Err(_) => warn!("呈现端仍被引用，延后释放"),
            }
        }
        if let Some(audio) = self.audio.take() {
            audio.lock().close();
        }
        debug!("会话资源已释放");
        stats
    }
}

/// 会话构建器
///
/// 根据流元数据和可用的输出决定开启哪些流，并把解码回调接到呈现端和音频输出上。
pub struct SessionBuilder {
    engine: Box<dyn DecodeEngine>,
    presenter: Option<Box<dyn PresentationStrategy>>,
    audio: Option<AudioSink>,
    events: Box<dyn EventSource>,
    config: PlayerConfig,
    clock: Box<dyn WallClock>,
    pacing: Pacing,
    display_size: Option<(u32, u32)>,
}

impl SessionBuilder {
    pub fn new(engine: Box<dyn DecodeEngine>) -> Self {
        Self {
            engine,
            presenter: None,
            audio: None,
            events: Box::new(NoEvents),
            config: PlayerConfig::default(),
            clock: Box::new(SystemClock::new()),
            pacing: Pacing::Timed,
            display_size: None,
        }
    }

    pub fn presenter(mut self, presenter: Box<dyn PresentationStrategy>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn audio(mut self, sink: AudioSink) -> Self {
        self.audio = Some(sink);
        self
    }

    pub fn events(mut self, events: Box<dyn EventSource>) -> Self {
        self.events = events;
        self
    }

    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Box<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// 后端默认的节拍方式，配置里显式指定时以配置为准
    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// 初始显示尺寸，默认等于视频尺寸
    pub fn display_size(mut self, width: u32, height: u32) -> Self {
        self.display_size = Some((width, height));
        self
    }

    pub fn build(self) -> Result<Session> {
        let SessionBuilder {
            mut engine,
            presenter,
            audio,
            events,
            config,
            clock,
            pacing,
            display_size,
        } = self;

        let mut info = engine.stream_info();
        if info.has_video && info.framerate <= 0.0 {
            return Err(PlayerError::EngineError(format!(
                "无效帧率: {}",
                info.framerate
            )));
        }

        if info.has_video && presenter.is_none() {
            info!("没有视频输出，忽略视频流");
            info.has_video = false;
        }
        let audio = if info.has_audio { audio } else { None };
        if info.has_audio && audio.is_none() {
            info!("没有音频输出，忽略音频流");
            info.has_audio = false;
        }
        if !info.has_video && !info.has_audio {
            return Err(PlayerError::NoStream);
        }

        engine.set_video_enabled(info.has_video);
        engine.set_audio_enabled(info.has_audio);

        let prepare_errors = Arc::new(AtomicU64::new(0));
        let error_log_every = config.error_log_every;

        let presenter = if info.has_video { presenter } else { None };
        let presenter_kind = presenter.as_ref().map(|p| p.kind());
        let presenter: Option<SharedPresenter> = presenter.map(|p| Arc::new(Mutex::new(p)));
        if let Some(shared) = &presenter {
            let shared = shared.clone();
            let errors = prepare_errors.clone();
            engine.set_video_callback(Box::new(move |frame| {
                if let Err(e) = shared.lock().prepare(frame) {
                    let count = errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if should_log(count, error_log_every) {
                        warn!("写入视频帧失败（第 {} 次）: {}", count, e);
                    }
                }
            }));
        }

        let audio: Option<SharedAudio> = audio.map(|sink| Arc::new(Mutex::new(sink)));
        let mut lead = Duration::ZERO;
        if let Some(shared) = &audio {
            {
                let sink = shared.lock();
                lead = sink.lead_time();
                engine.set_audio_lead_time(lead);
                engine.set_audio_output(sink.served());
            }
            let shared = shared.clone();
            engine.set_audio_callback(Box::new(move |chunk| shared.lock().write(chunk)));
        }

        // 单次 decode 上限：有视频时为一帧，纯音频时为一个音频帧
        let max_step = if info.has_video {
            Duration::from_secs_f64(info.frame_interval())
        } else if lead > Duration::ZERO {
            lead
        } else {
            config.tick_interval()
        };

        let pacing = config.pacing.unwrap_or(pacing);
        let pacer = Pacer::new(clock, pacing, max_step, &config);

        info!(
            "🎞 会话就绪: 视频 {} ({}x{} @ {:.3} fps), 音频 {} ({} Hz), 输出 {}",
            if info.has_video { "开" } else { "关" },
            info.width,
            info.height,
            info.framerate,
            if info.has_audio { "开" } else { "关" },
            info.sample_rate,
            presenter_kind.map(StrategyKind::name).unwrap_or("无")
        );

        Ok(Session {
            display_size: display_size.unwrap_or((info.width, info.height)),
            info,
            control: ControlState::default(),
            engine,
            presenter,
            presenter_kind,
            audio,
            events,
            pacer,
            prepare_errors,
        })
    }
}

/// 运行会话直到用户退出或流结束，返回统计
pub fn run(mut session: Session) -> Result<PlaybackStats> {
    info!("▶ 开始播放");
    loop {
        let outcome = session.tick();
        if outcome.is_terminal() {
            debug!("主循环结束: {:?}", outcome);
            break;
        }
        session.wait_next(outcome);
    }

    let stats = session.shutdown();
    info!(
        "⏹ 播放停止: {} ticks, {} 次解码, {} 次跳转, 帧 {} 写入 / {} 跳过, {} 次呈现, 音频 {} 块 / 丢弃 {}, 媒体时间 {:.3}s",
        stats.pacer.ticks,
        stats.pacer.decode_steps,
        stats.pacer.seeks,
        stats.present.frames_prepared,
        stats.present.frames_skipped,
        stats.present.presents,
        stats.audio.chunks_written,
        stats.audio.chunks_dropped,
        stats.media_time
    );
    Ok(stats)
}
