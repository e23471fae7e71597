use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("无法打开媒体: {0}")]
    OpenError(String),

    #[error("没有可播放的音视频流")]
    NoStream,

    #[error("解码引擎错误: {0}")]
    EngineError(String),

    #[error("显示错误: {0}")]
    DisplayError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("共享内存错误: {0}")]
    SharedMemoryError(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// 重复错误的日志采样：前 3 次都记，之后每 `every` 次记一次
pub fn should_log(count: u64, every: u64) -> bool {
    count <= 3 || count % every.max(1) == 0
}
