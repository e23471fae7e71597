use mpg_player::core::{
    ManualClock, Pacing, PixelFormat, PlanarFrame, Plane, PlayerError, Result, SampleData,
    SampleFormat, StreamInfo,
};
use mpg_player::player::{
    control_channel, AudioCallback, AudioDevice, AudioSink, AudioSpec, ControlEvent, DecodeEngine,
    SessionBuilder, SyntheticConfig, SyntheticEngine, TickOutcome, VideoCallback,
};
use mpg_player::renderer::{
    plan_shm_strategy, AdaptorInfo, FallbackReason, HardwareOverlay, OverlayChoice, OverlayProbe,
    PlaneLayout, PresentStats, PresentationStrategy, ShmBackend, ShmRegion, ShmTarget,
    SoftwareConvert, StrategyKind, StrategyPlan,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

// ---------- 测试替身 ----------

/// 会话交给引擎的音频参数
#[derive(Debug, Default)]
struct AudioSetup {
    output: Option<AudioSpec>,
    lead: Duration,
}

struct ScriptEngine {
    log: Log,
    time: f64,
    end_after_decodes: Option<usize>,
    /// 媒体时间到达该值即视为结束
    end_at: Option<f64>,
    decodes: usize,
    audio_setup: Arc<Mutex<AudioSetup>>,
}

impl ScriptEngine {
    fn new(log: Log, time: f64) -> Self {
        Self {
            log,
            time,
            end_after_decodes: None,
            end_at: None,
            decodes: 0,
            audio_setup: Arc::default(),
        }
    }
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
    fn set_audio_lead_time(&mut self, lead: Duration) {
        self.audio_setup.lock().lead = lead;
    }

    fn set_audio_output(&mut self, output: AudioSpec) {
        self.audio_setup.lock().output = Some(output);
    }

    fn decode(&mut self, elapsed: Duration) {
        self.decodes += 1;
        self.time += elapsed.as_secs_f64();
        self.log.lock().push(format!("decode {}ms", elapsed.as_millis()));
    }

    fn seek(&mut self, time: f64, exact: bool) -> bool {
        self.time = time;
        self.log.lock().push(format!("seek {} {}", time, exact));
        true
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn has_ended(&self) -> bool {
        self.end_after_decodes.is_some_and(|n| self.decodes >= n)
            || self.end_at.is_some_and(|t| self.time >= t)
    }
}

fn device_spec() -> AudioSpec {
    AudioSpec {
        sample_rate: 44100,
        channels: 2,
        format: SampleFormat::F32,
    }
}

struct LogDevice {
    log: Log,
}

impl AudioDevice for LogDevice {
    fn spec(&self) -> AudioSpec {
        device_spec()
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

/// 按固定规格服务的设备，不管请求什么
struct FixedDevice {
    spec: AudioSpec,
}

impl AudioDevice for FixedDevice {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn put(&mut self, _samples: &SampleData<'_>) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct CountingPresenter {
    stats: PresentStats,
}

impl PresentationStrategy for CountingPresenter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NativeTexture
    }

    fn prepare(&mut self, _frame: &PlanarFrame<'_>) -> Result<()> {
        self.stats.frames_prepared += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.stats.presents += 1;
        Ok(())
    }

    fn stats(&self) -> PresentStats {
        self.stats
    }
}

struct HeapRegion(Vec<u8>);

impl ShmRegion for HeapRegion {
    fn shm_id(&self) -> u32 {
        7
    }
    fn as_slice(&self) -> &[u8] {
        &self.0
    }
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

struct HeapShm {
    log: Log,
    fail_attach: bool,
}

impl ShmBackend for HeapShm {
    fn allocate(&mut self, size: usize) -> Result<Box<dyn ShmRegion>> {
        self.log.lock().push(format!("allocate {}", size));
        Ok(Box::new(HeapRegion(vec![0; size])))
    }

    fn attach(&mut self, _region: &dyn ShmRegion) -> Result<u32> {
        if self.fail_attach {
            return Err(PlayerError::SharedMemoryError("attach refused".to_string()));
        }
        self.log.lock().push("attach".to_string());
        Ok(0x42)
    }

    fn detach(&mut self, segment: u32) -> Result<()> {
        self.log.lock().push(format!("detach {:#x}", segment));
        Ok(())
    }

    fn free(&mut self, _region: Box<dyn ShmRegion>) -> Result<()> {
        self.log.lock().push("free".to_string());
        Ok(())
    }
}

struct LogTarget {
    log: Log,
}

impl ShmTarget for LogTarget {
    fn put_overlay(
        &mut self,
        port: u32,
        _segment: u32,
        format: PixelFormat,
        _image: (u32, u32),
        _video: (u32, u32),
        _output: (u32, u32),
    ) -> Result<()> {
        self.log.lock().push(format!("overlay {} {}", port, format.name()));
        Ok(())
    }

    fn put_image(&mut self, segment: u32, video: (u32, u32)) -> Result<()> {
        self.log
            .lock()
            .push(format!("image {:#x} {}x{}", segment, video.0, video.1));
        Ok(())
    }

    fn release_port(&mut self, port: u32) -> Result<()> {
        self.log.lock().push(format!("release {}", port));
        Ok(())
    }
}

struct NoAdaptors;

impl OverlayProbe for NoAdaptors {
    fn adaptors(&mut self) -> Result<Vec<AdaptorInfo>> {
        Ok(Vec::new())
    }
    fn image_formats(&mut self, _port: u32) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }
    fn grab_port(&mut self, _port: u32) -> Result<bool> {
        Ok(false)
    }
}

struct GrayFrame {
    y: Vec<u8>,
    c: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayFrame {
    fn new(width: u32, height: u32) -> Self {
        Self {
            y: vec![128; (width * height) as usize],
            c: vec![128; (width * height / 4) as usize],
            width,
            height,
        }
    }

    fn chroma(&self) -> Plane<'_> {
        Plane {
            width: self.width / 2,
            height: self.height / 2,
            stride: (self.width / 2) as usize,
            data: &self.c,
        }
    }

    fn frame(&self) -> PlanarFrame<'_> {
        PlanarFrame {
            time: 0.0,
            width: self.width,
            height: self.height,
            y: Plane {
                width: self.width,
                height: self.height,
                stride: self.width as usize,
                data: &self.y,
            },
            cb: self.chroma(),
            cr: self.chroma(),
        }
    }
}

// ---------- 场景 ----------

#[test]
fn test_seek_clears_audio_before_engine_and_skips_decode() {
    let log: Log = Arc::default();
    let device = LogDevice { log: log.clone() };
    let sink = AudioSink::open(Box::new(device), device_spec(), 1152).unwrap();
    let (tx, events) = control_channel();

    let mut session = SessionBuilder::new(Box::new(ScriptEngine::new(log.clone(), 10.0)))
        .presenter(Box::new(CountingPresenter::default()))
        .audio(sink)
        .events(Box::new(events))
        .clock(Box::new(ManualClock::new()))
        .build()
        .unwrap();

    tx.send(ControlEvent::SeekBy(-3.0)).unwrap();
    assert_eq!(session.tick(), TickOutcome::Seeked(7.0));
    assert_eq!(entries(&log), vec!["clear", "seek 7 false"]);
    assert_eq!(session.stats().pacer.decode_steps, 0);
}

#[test]
fn test_engine_resamples_to_the_served_device_rate() {
    let served = AudioSpec {
        sample_rate: 48000,
        channels: 2,
        format: SampleFormat::S16,
    };
    let sink = AudioSink::open(Box::new(FixedDevice { spec: served }), device_spec(), 1152).unwrap();
    let engine = ScriptEngine::new(Arc::default(), 0.0);
    let audio_setup = engine.audio_setup.clone();

    let _session = SessionBuilder::new(Box::new(engine))
        .presenter(Box::new(CountingPresenter::default()))
        .audio(sink)
        .clock(Box::new(ManualClock::new()))
        .build()
        .unwrap();

    let setup = audio_setup.lock();
    assert_eq!(setup.output, Some(served));
    // 提前量仍按流的采样率计算
    assert_eq!(setup.lead, Duration::from_secs_f64(1152.0 / 44100.0));
}

#[test]
fn test_elapsed_is_clamped_to_one_frame() {
    let log: Log = Arc::default();
    let clock = ManualClock::new();
    let mut session = SessionBuilder::new(Box::new(ScriptEngine::new(log.clone(), 0.0)))
        .presenter(Box::new(CountingPresenter::default()))
        .clock(Box::new(clock.clone()))
        .build()
        .unwrap();

    session.tick();
    clock.advance(Duration::from_secs(3));
    assert_eq!(session.tick(), TickOutcome::Decoded(Duration::from_millis(40)));
    assert_eq!(entries(&log), vec!["decode 0ms", "decode 40ms"]);
}

#[test]
fn test_end_of_stream_stops_on_the_same_tick() {
    let log: Log = Arc::default();
    let mut engine = ScriptEngine::new(log.clone(), 0.0);
    engine.end_after_decodes = Some(2);
    let clock = ManualClock::new();
    let mut session = SessionBuilder::new(Box::new(engine))
        .presenter(Box::new(CountingPresenter::default()))
        .clock(Box::new(clock.clone()))
        .build()
        .unwrap();

    assert!(matches!(session.tick(), TickOutcome::Decoded(_)));
    clock.advance(Duration::from_millis(20));
    assert_eq!(session.tick(), TickOutcome::Ended);
    // 结束的 tick 不再呈现
    assert_eq!(session.stats().present.presents, 1);
}

#[test]
fn test_seek_onto_end_of_stream_stops_without_decoding() {
    let log: Log = Arc::default();
    let mut engine = ScriptEngine::new(log.clone(), 58.0);
    engine.end_at = Some(60.0);
    let (tx, events) = control_channel();
    let session = SessionBuilder::new(Box::new(engine))
        .presenter(Box::new(CountingPresenter::default()))
        .events(Box::new(events))
        .clock(Box::new(ManualClock::new()))
        .build()
        .unwrap();

    // 58 + 3 截断到时长 60
    tx.send(ControlEvent::SeekBy(3.0)).unwrap();
    let stats = mpg_player::run(session).unwrap();

    assert_eq!(entries(&log), vec!["seek 60 false"]);
    assert_eq!(stats.pacer.seeks, 1);
    assert_eq!(stats.pacer.decode_steps, 0);
    assert_eq!(stats.pacer.ticks, 1);
    assert_eq!(stats.present.presents, 0);
}

#[test]
fn test_silent_source_produces_video_only() {
    let clock = ManualClock::new();
    let engine = SyntheticEngine::new(SyntheticConfig {
        width: 64,
        height: 48,
        framerate: 25.0,
        sample_rate: 0,
        duration: 5.0,
        ..SyntheticConfig::default()
    });
    let device = LogDevice { log: Log::default() };
    let sink = AudioSink::open(Box::new(device), device_spec(), 1152).unwrap();
    let mut session = SessionBuilder::new(Box::new(engine))
        .presenter(Box::new(CountingPresenter::default()))
        .audio(sink)
        .clock(Box::new(clock.clone()))
        .pacing(Pacing::Timed)
        .build()
        .unwrap();

    assert!(!session.info().has_audio);
    session.tick();
    clock.advance(Duration::from_millis(40));
    session.tick();

    let stats = session.stats();
    assert_eq!(stats.present.frames_prepared, 1);
    assert_eq!(stats.audio.chunks_written, 0);
}

#[test]
fn test_no_adaptors_falls_back_to_bgra() {
    let plan = plan_shm_strategy(&mut NoAdaptors, true);
    assert_eq!(plan, StrategyPlan::Software(FallbackReason::NoAdaptor));
    assert_eq!(plan.kind(), StrategyKind::SoftwareConvert);

    let log: Log = Arc::default();
    let mut software = SoftwareConvert::new(
        Box::new(LogTarget { log: log.clone() }),
        Box::new(HeapShm {
            log: log.clone(),
            fail_attach: false,
        }),
        64,
        48,
    )
    .unwrap();

    let gray = GrayFrame::new(64, 48);
    software.prepare(&gray.frame()).unwrap();
    software.present().unwrap();

    let bytes = software.buffer().unwrap();
    assert_eq!(bytes.len(), 64 * 48 * 4);
    assert!(bytes.chunks(4).all(|px| px == [128, 128, 128, 255]));

    drop(software);
    assert_eq!(
        entries(&log),
        vec![
            "allocate 12288",
            "attach",
            "image 0x42 64x48",
            "detach 0x42",
            "free"
        ]
    );
}

#[test]
fn test_overlay_setup_failure_frees_without_detach() {
    let log: Log = Arc::default();
    let choice = OverlayChoice {
        adaptor: "test".to_string(),
        port: 61,
        format: PixelFormat::I420,
    };
    let result = HardwareOverlay::new(
        Box::new(LogTarget { log: log.clone() }),
        Box::new(HeapShm {
            log: log.clone(),
            fail_attach: true,
        }),
        choice,
        64,
        48,
    );

    assert!(matches!(result, Err(PlayerError::SharedMemoryError(_))));
    assert_eq!(entries(&log), vec!["allocate 4608", "free", "release 61"]);
}

#[test]
fn test_overlay_plane_order_follows_format() {
    let layout = PlaneLayout::macroblock(64, 48);
    assert_eq!(layout.luma_range(), 0..3072);
    assert_eq!(layout.cb_range(PixelFormat::I420), 3072..3840);
    assert_eq!(layout.cr_range(PixelFormat::I420), 3840..4608);
    assert_eq!(layout.cr_range(PixelFormat::YV12), 3072..3840);
    assert_eq!(layout.cb_range(PixelFormat::YV12), 3840..4608);
}
