use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use mpg_player::core::{MediaSource, PlayerConfig, StreamInfo};
use mpg_player::player::{
    AudioDevice, AudioSink, AudioSpec, CpalDevice, DecodeEngine, FfmpegEngine, SessionBuilder,
    SyntheticConfig, SyntheticEngine,
};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// XVideo 覆盖层，不可用时退回 MIT-SHM 软件转换
    X11,
    /// SDL 原生 YUV 纹理
    Sdl,
    /// 不开窗口，只播放音频
    Headless,
}

const fn default_backend() -> Backend {
    if cfg!(feature = "x11") {
        Backend::X11
    } else if cfg!(feature = "sdl") {
        Backend::Sdl
    } else {
        Backend::Headless
    }
}

#[derive(Parser, Debug)]
#[command(name = "mpg-player", version, about = "MPEG-1 播放器")]
struct Args {
    /// 本地文件、http(s) URL，或 testsrc（内置测试图案）
    input: String,

    /// 显示后端
    #[arg(long, value_enum, default_value_t = default_backend())]
    backend: Backend,

    /// 不输出音频
    #[arg(long)]
    no_audio: bool,

    /// 不输出视频
    #[arg(long)]
    no_video: bool,

    /// 跳过覆盖层协商，强制软件转换（仅 X11）
    #[arg(long)]
    software: bool,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("无法读取配置 {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if args.software {
        config.allow_overlay = false;
    }

    info!("🎬 mpg-player 启动");

    let source = MediaSource::from_arg(&args.input);
    if !source.is_reachable() {
        bail!("文件不存在: {}", source.location());
    }

    let engine: Box<dyn DecodeEngine> = match &source {
        MediaSource::TestPattern => Box::new(SyntheticEngine::new(SyntheticConfig::default())),
        _ => Box::new(FfmpegEngine::open(&source)?),
    };
    let info = engine.stream_info();
    info!(
        "📋 流信息: 视频 {} {}x{} @ {:.3} fps, 音频 {} {} Hz, 时长 {}",
        info.has_video,
        info.width,
        info.height,
        info.framerate,
        info.has_audio,
        info.sample_rate,
        info.duration
            .map(|d| format!("{:.1}s", d))
            .unwrap_or_else(|| "未知".to_string())
    );

    let want_video = info.has_video && !args.no_video;
    let want_audio = info.has_audio && !args.no_audio;
    let title = format!("mpg-player - {}", source.display_name());

    let builder = SessionBuilder::new(engine);

    let stats = match args.backend {
        #[cfg(feature = "x11")]
        Backend::X11 => x11_backend::play(builder, &title, &info, want_video, want_audio, config)?,
        #[cfg(feature = "sdl")]
        Backend::Sdl => sdl_backend::play(builder, &title, &info, want_video, want_audio, config)?,
        Backend::Headless => {
            let builder = match open_audio(&info, want_audio, &config, cpal_device) {
                Some(sink) => builder.audio(sink),
                None => builder,
            };
            mpg_player::run(builder.config(config).build()?)?
        }
        #[allow(unreachable_patterns)]
        other => bail!("后端 {:?} 未编译进来", other),
    };

    info!("播放结束，媒体时间 {:.3}s", stats.media_time);
    Ok(())
}

fn cpal_device(requested: AudioSpec) -> mpg_player::Result<Box<dyn AudioDevice>> {
    Ok(Box::new(CpalDevice::open(requested)?))
}

/// 打开音频输出，失败时只告警，继续无声播放
fn open_audio(
    info: &StreamInfo,
    want_audio: bool,
    config: &PlayerConfig,
    open_device: impl FnOnce(AudioSpec) -> mpg_player::Result<Box<dyn AudioDevice>>,
) -> Option<AudioSink> {
    if !want_audio {
        return None;
    }
    let requested = AudioSpec {
        sample_rate: info.sample_rate,
        channels: config.audio_channels,
        format: config.audio_format,
    };
    let sink = open_device(requested).and_then(|device| {
        AudioSink::open(device, requested, config.samples_per_frame)
            .map(|sink| sink.with_error_log_every(config.error_log_every))
    });
    match sink {
        Ok(sink) => Some(sink),
        Err(e) => {
            warn!("⚠️  音频输出不可用，静音播放: {}", e);
            None
        }
    }
}

#[cfg(feature = "x11")]
mod x11_backend {
    use super::*;
    use mpg_player::core::Pacing;
    use mpg_player::platform::x11::X11Display;
    use mpg_player::player::{control_channel, PlaybackStats};
    use mpg_player::renderer::{
        plan_shm_strategy, HardwareOverlay, PresentationStrategy, SoftwareConvert, StrategyPlan,
    };

    pub fn play(
        builder: SessionBuilder,
        title: &str,
        info: &StreamInfo,
        want_video: bool,
        want_audio: bool,
        config: PlayerConfig,
    ) -> Result<PlaybackStats> {
        let mut builder = builder.pacing(Pacing::Timed);
        // 窗口要比会话活得久，放在外层作用域
        let mut display = None;

        if want_video {
            let mut x11 = X11Display::open(title, info.width, info.height)?;
            let target = Box::new(x11.target());
            let backend = Box::new(x11.shm_backend()?);

            let presenter: Box<dyn PresentationStrategy> =
                match plan_shm_strategy(&mut x11.probe(), config.allow_overlay) {
                    StrategyPlan::Overlay(choice) => {
                        x11.enable_vblank_sync(choice.port);
                        Box::new(HardwareOverlay::new(
                            target,
                            backend,
                            choice,
                            info.width,
                            info.height,
                        )?)
                    }
                    StrategyPlan::Software(_) => {
                        x11.fix_size(info.width, info.height)?;
                        Box::new(SoftwareConvert::new(target, backend, info.width, info.height)?)
                    }
                };

            let (tx, events) = control_channel();
            x11.spawn_listener(tx, config.seek_step_secs)?;
            builder = builder
                .presenter(presenter)
                .events(Box::new(events))
                .display_size(info.width, info.height);
            display = Some(x11);
        }

        if let Some(sink) = open_audio(info, want_audio, &config, cpal_device) {
            builder = builder.audio(sink);
        }

        let stats = mpg_player::run(builder.config(config).build()?)?;
        drop(display);
        Ok(stats)
    }
}

#[cfg(feature = "sdl")]
mod sdl_backend {
    use super::*;
    use mpg_player::core::Pacing;
    use mpg_player::platform::sdl::SdlContext;
    use mpg_player::player::PlaybackStats;
    use mpg_player::renderer::NativeTexture;

    pub fn play(
        builder: SessionBuilder,
        title: &str,
        info: &StreamInfo,
        want_video: bool,
        want_audio: bool,
        config: PlayerConfig,
    ) -> Result<PlaybackStats> {
        let sdl = SdlContext::init()?;
        let mut builder = builder.pacing(Pacing::VsyncLocked);

        if want_video {
            let texture = sdl.texture(title, info.width, info.height)?;
            builder = builder
                .presenter(Box::new(NativeTexture::new(Box::new(texture))))
                .events(Box::new(sdl.events(config.seek_step_secs)?));
        } else {
            // 没有垂直同步的 present 可以限速
            builder = builder.pacing(Pacing::Timed);
        }

        let open_device = |requested: AudioSpec| -> mpg_player::Result<Box<dyn AudioDevice>> {
            Ok(Box::new(sdl.audio(requested)?))
        };
        if let Some(sink) = open_audio(info, want_audio, &config, open_device) {
            builder = builder.audio(sink);
        }

        Ok(mpg_player::run(builder.config(config).build()?)?)
    }
}
