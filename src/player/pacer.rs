use crate::core::{should_log, Pacing, PlayerConfig, WallClock};
use crate::player::control::{ControlEvent, ControlState, DisplayEffect, EventSource};
use crate::player::engine::DecodeEngine;
use crate::player::session::{SharedAudio, SharedPresenter};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// 一个 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// 推进了 `elapsed`
    Decoded(Duration),
    /// 执行了跳转，本 tick 不解码不呈现
    Seeked(f64),
    Paused,
    /// 流结束
    Ended,
    /// 用户退出
    Quit,
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickOutcome::Ended | TickOutcome::Quit)
    }
}

/// 节拍器计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub ticks: u64,
    pub decode_steps: u64,
    pub seeks: u64,
    pub paused_ticks: u64,
    /// 单次 decode 的流逝时间被截断的次数
    pub clamped_steps: u64,
    pub present_errors: u64,
}

/// 一个 tick 需要访问的会话部件
pub struct TickContext<'a> {
    pub engine: &'a mut dyn DecodeEngine,
    pub control: &'a mut ControlState,
    pub events: &'a mut dyn EventSource,
    pub presenter: Option<&'a SharedPresenter>,
    pub audio: Option<&'a SharedAudio>,
    pub display_size: &'a mut (u32, u32),
    pub duration: Option<f64>,
    pub has_video: bool,
}

/// 墙钟驱动的节拍器
///
/// 每个 tick：轮询输入 → 暂停则返回 → 计算并截断流逝时间 →
/// 跳转（先清音频再 seek）或解码 → 结束检测 → 呈现。全部在调用线程上顺序执行。
pub struct Pacer {
    clock: Box<dyn WallClock>,
    pacing: Pacing,
    interval: Duration,
    max_step: Duration,
    last_tick: Option<Duration>,
    ideal_next: Option<Duration>,
    clamp_seek: bool,
    error_log_every: u64,
    events: Vec<ControlEvent>,
    stats: PacerStats,
}

impl Pacer {
    /// `max_step` 为单次 decode 允许的最大流逝时间（通常是一帧）
    pub fn new(clock: Box<dyn WallClock>, pacing: Pacing, max_step: Duration, config: &PlayerConfig) -> Self {
        info!(
            "⏱ 节拍器: {:?}, 间隔 {}ms, 单步上限 {:.1}ms",
            pacing,
            config.tick_interval_ms,
            max_step.as_secs_f64() * 1000.0
        );
        Self {
            clock,
            pacing,
            interval: config.tick_interval(),
            max_step,
            last_tick: None,
            ideal_next: None,
            clamp_seek: config.clamp_seek,
            error_log_every: config.error_log_every.max(1),
            events: Vec::new(),
            stats: PacerStats::default(),
        }
    }

    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// 本次流逝时间，截断到 `max_step`
    fn elapsed(&mut self, now: Duration) -> Duration {
        let elapsed = match self.last_tick {
            Some(last) => now.saturating_sub(last),
            None => Duration::ZERO,
        };
        self.last_tick = Some(now);
        if elapsed > self.max_step {
            self.stats.clamped_steps += 1;
            trace!("流逝时间 {:?} 截断为 {:?}", elapsed, self.max_step);
            self.max_step
        } else {
            elapsed
        }
    }

    pub fn tick(&mut self, ctx: TickContext<'_>) -> TickOutcome {
        self.stats.ticks += 1;
        let now = self.clock.now();
        if self.ideal_next.is_none() {
            self.ideal_next = Some(now);
        }

        if !ctx.control.running {
            return TickOutcome::Quit;
        }

        let mut events = std::mem::take(&mut self.events);
        ctx.events.poll(&mut events);
        for event in events.drain(..) {
            let effect = ctx.control.apply(
                event,
                ctx.engine.current_time(),
                ctx.duration,
                self.clamp_seek,
            );
            if let Some(effect) = effect {
                apply_effect(effect, ctx.presenter, &mut *ctx.display_size);
            }
        }
        self.events = events;

        if !ctx.control.running {
            return TickOutcome::Quit;
        }

        if ctx.control.paused {
            // 恢复时从当前时刻重新计时
            self.last_tick = Some(now);
            self.stats.paused_ticks += 1;
            return TickOutcome::Paused;
        }

        let elapsed = self.elapsed(now);

        if let Some(target) = ctx.control.take_seek() {
            if let Some(audio) = ctx.audio {
                audio.lock().clear();
            }
            if !ctx.engine.seek(target, false) {
                warn!("跳转到 {:.3}s 失败", target);
            }
            self.stats.seeks += 1;
            info!("⏩ 跳转到 {:.3}s", target);
            // 落在流末尾的跳转同样在本 tick 结束
            if ctx.engine.has_ended() {
                info!("播放结束 ({:.3}s)", ctx.engine.current_time());
                return TickOutcome::Ended;
            }
            return TickOutcome::Seeked(target);
        }

        ctx.engine.decode(elapsed);
        self.stats.decode_steps += 1;

        if ctx.engine.has_ended() {
            info!("播放结束 ({:.3}s)", ctx.engine.current_time());
            return TickOutcome::Ended;
        }

        if ctx.has_video {
            if let Some(presenter) = ctx.presenter {
                if let Err(e) = presenter.lock().present() {
                    self.stats.present_errors += 1;
                    let count = self.stats.present_errors;
                    if should_log(count, self.error_log_every) {
                        warn!("呈现失败（第 {} 次）: {}", count, e);
                    }
                }
            }
        }

        TickOutcome::Decoded(elapsed)
    }

    /// 等到下一个 tick
    ///
    /// Timed：理想时刻每次前进固定间隔，睡掉剩余时间；落后超过一个间隔就重新对齐。
    /// VsyncLocked：由 present 的垂直同步限速，只有暂停时才睡一个间隔。
    pub fn wait_next(&mut self, outcome: TickOutcome) {
        match self.pacing {
            Pacing::Timed => {
                let now = self.clock.now();
                let next = self.ideal_next.unwrap_or(now) + self.interval;
                if next > now {
                    self.clock.sleep(next - now);
                    self.ideal_next = Some(next);
                } else {
                    self.ideal_next = Some(now);
                }
            }
            Pacing::VsyncLocked => {
                if outcome == TickOutcome::Paused {
                    self.clock.sleep(self.interval);
                }
            }
        }
    }
}

/// 把显示副作用转交给呈现策略
fn apply_effect(
    effect: DisplayEffect,
    presenter: Option<&SharedPresenter>,
    display_size: &mut (u32, u32),
) {
    if let DisplayEffect::Resize { width, height } = effect {
        *display_size = (width, height);
    }
    let Some(presenter) = presenter else {
        return;
    };
    let mut presenter = presenter.lock();
    let result = match effect {
        DisplayEffect::Fullscreen(on) => presenter.set_fullscreen(on),
        DisplayEffect::Visibility(visible) => {
            presenter.set_visible(visible);
            Ok(())
        }
        DisplayEffect::Resize { width, height } => {
            debug!("显示区域: {}x{}", width, height);
            presenter.resize(width, height);
            Ok(())
        }
        DisplayEffect::Expose => presenter.expose(),
    };
    if let Err(e) = result {
        warn!("显示状态更新失败: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualClock, Result, SampleData, SampleFormat, StreamInfo};
    use crate::player::audio_output::{AudioDevice, AudioSink, AudioSpec};
    use crate::player::control::{control_channel, ChannelEvents};
    use crate::player::engine::{AudioCallback, VideoCallback};
    use crossbeam_channel::Sender;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    struct ScriptEngine {
        log: Log,
        time: f64,
        end_after_decodes: Option<usize>,
        decodes: usize,
    }

    impl DecodeEngine for ScriptEngine {
        fn stream_info(&self) -> StreamInfo {
            StreamInfo {
                has_video: true,
                has_audio: true,
                width: 64,
                height: 48,
                framerate: 25.0,
                sample_rate: 44100,
                duration: Some(60.0),
            }
        }
        fn set_video_enabled(&mut self, _enabled: bool) {}
        fn set_audio_enabled(&mut self, _enabled: bool) {}
        fn set_video_callback(&mut self, _callback: VideoCallback) {}
        fn set_audio_callback(&mut self, _callback: AudioCallback) {}
        fn set_audio_lead_time(&mut self, _lead: Duration) {}

        fn decode(&mut self, elapsed: Duration) {
            self.decodes += 1;
            self.time += elapsed.as_secs_f64();
            self.log.lock().push(format!("decode {}ms", elapsed.as_millis()));
        }

        fn seek(&mut self, time: f64, exact: bool) -> bool {
            self.log.lock().push(format!("seek {} {}", time, exact));
            self.time = time;
            true
        }

        fn current_time(&self) -> f64 {
            self.time
        }

        fn has_ended(&self) -> bool {
            self.end_after_decodes.map_or(false, |n| self.decodes >= n)
        }
    }

    struct LogDevice {
        log: Log,
    }

    impl AudioDevice for LogDevice {
        fn spec(&self) -> AudioSpec {
            AudioSpec {
                sample_rate: 44100,
                channels: 2,
                format: SampleFormat::F32,
            }
        }
        fn put(&mut self, _samples: &SampleData<'_>) -> Result<()> {
            Ok(())
        }
        fn clear(&mut self) -> Result<()> {
            self.log.lock().push("clear".to_string());
            Ok(())
        }
        fn close(&mut self) {}
    }

    struct Harness {
        log: Log,
        clock: ManualClock,
        pacer: Pacer,
        engine: ScriptEngine,
        control: ControlState,
        events: ChannelEvents,
        tx: Sender<ControlEvent>,
        audio: SharedAudio,
        display: (u32, u32),
    }

    impl Harness {
        fn new(pacing: Pacing) -> Self {
            let log: Log = Arc::default();
            let clock = ManualClock::new();
            let pacer = Pacer::new(
                Box::new(clock.clone()),
                pacing,
                Duration::from_millis(40),
                &PlayerConfig::default(),
            );
            let device = LogDevice { log: log.clone() };
            let sink = AudioSink::open(Box::new(device), device_spec(), 1152).unwrap();
            let (tx, events) = control_channel();
            Self {
                engine: ScriptEngine {
                    log: log.clone(),
                    time: 0.0,
                    end_after_decodes: None,
                    decodes: 0,
                },
                log,
                clock,
                pacer,
                control: ControlState::default(),
                events,
                tx,
                audio: Arc::new(Mutex::new(sink)),
                display: (64, 48),
            }
        }

        fn tick(&mut self) -> TickOutcome {
            self.pacer.tick(TickContext {
                engine: &mut self.engine,
                control: &mut self.control,
                events: &mut self.events,
                presenter: None,
                audio: Some(&self.audio),
                display_size: &mut self.display,
                duration: Some(60.0),
                has_video: true,
            })
        }
    }

    fn device_spec() -> AudioSpec {
        AudioSpec {
            sample_rate: 44100,
            channels: 2,
            format: SampleFormat::F32,
        }
    }

    #[test]
    fn test_elapsed_is_clamped_to_one_frame() {
        let mut h = Harness::new(Pacing::Timed);
        assert_eq!(h.tick(), TickOutcome::Decoded(Duration::ZERO));
        h.clock.advance(Duration::from_secs(2));
        assert_eq!(h.tick(), TickOutcome::Decoded(Duration::from_millis(40)));
        h.clock.advance(Duration::from_millis(17));
        assert_eq!(h.tick(), TickOutcome::Decoded(Duration::from_millis(17)));
        assert_eq!(h.pacer.stats().clamped_steps, 1);
    }

    #[test]
    fn test_seek_clears_audio_first_and_skips_decode() {
        let mut h = Harness::new(Pacing::Timed);
        h.engine.time = 10.0;
        h.tx.send(ControlEvent::SeekBy(-3.0)).unwrap();
        h.clock.advance(Duration::from_millis(20));

        assert_eq!(h.tick(), TickOutcome::Seeked(7.0));
        assert_eq!(*h.log.lock(), vec!["clear", "seek 7 false"]);
        assert_eq!(h.control.pending_seek, None);
    }

    #[test]
    fn test_pending_seek_survives_pause() {
        let mut h = Harness::new(Pacing::Timed);
        h.engine.time = 5.0;
        h.tx.send(ControlEvent::TogglePause).unwrap();
        h.tx.send(ControlEvent::SeekBy(3.0)).unwrap();
        assert_eq!(h.tick(), TickOutcome::Paused);
        assert_eq!(h.tick(), TickOutcome::Paused);
        assert!(h.log.lock().is_empty());

        h.tx.send(ControlEvent::TogglePause).unwrap();
        assert_eq!(h.tick(), TickOutcome::Seeked(8.0));
    }

    #[test]
    fn test_end_of_stream_stops_same_tick() {
        let mut h = Harness::new(Pacing::Timed);
        h.engine.end_after_decodes = Some(2);
        assert!(!h.tick().is_terminal());
        h.clock.advance(Duration::from_millis(17));
        assert_eq!(h.tick(), TickOutcome::Ended);
        assert_eq!(h.log.lock().len(), 2);
    }

    #[test]
    fn test_quit_and_resize() {
        let mut h = Harness::new(Pacing::Timed);
        h.tx.send(ControlEvent::Resize { width: 800, height: 600 }).unwrap();
        h.tick();
        assert_eq!(h.display, (800, 600));

        h.tx.send(ControlEvent::Quit).unwrap();
        assert_eq!(h.tick(), TickOutcome::Quit);
        assert_eq!(h.tick(), TickOutcome::Quit);
    }

    #[test]
    fn test_timed_pacing_sleeps_remainder() {
        let mut h = Harness::new(Pacing::Timed);
        let outcome = h.tick();
        h.clock.advance(Duration::from_millis(5));
        h.pacer.wait_next(outcome);
        assert_eq!(h.clock.total_slept(), Duration::from_millis(12));
    }

    #[test]
    fn test_vsync_pacing_only_sleeps_when_paused() {
        let mut h = Harness::new(Pacing::VsyncLocked);
        let outcome = h.tick();
        h.pacer.wait_next(outcome);
        assert_eq!(h.clock.total_slept(), Duration::ZERO);
        h.pacer.wait_next(TickOutcome::Paused);
        assert_eq!(h.clock.total_slept(), Duration::from_millis(17));
    }
}
