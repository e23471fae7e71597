use crate::core::{Result, SampleFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 节拍方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    /// 固定间隔轮询，剩余时间 sleep（X11 后端）
    Timed,
    /// 由垂直同步的 present 限速（SDL 后端）
    VsyncLocked,
}

/// 播放器配置
///
/// 所有字段都有默认值，JSON 文件里只需要写要改的项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 方向键一次跳转的秒数
    pub seek_step_secs: f64,
    /// Timed 节拍的目标间隔（毫秒）
    pub tick_interval_ms: u64,
    /// None 表示由显示后端决定
    pub pacing: Option<Pacing>,
    pub audio_channels: u16,
    pub audio_format: SampleFormat,
    /// 每个解码音频帧的样本数（MPEG-1 Layer II 为 1152）
    pub samples_per_frame: u32,
    /// 为 false 时跳过覆盖层协商，直接走软件转换
    pub allow_overlay: bool,
    /// 跳转目标是否限制在 [0, 时长] 内
    pub clamp_seek: bool,
    /// 逐 tick 错误的日志采样间隔
    pub error_log_every: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            seek_step_secs: 3.0,
            tick_interval_ms: 17,
            pacing: None,
            audio_channels: 2,
            audio_format: SampleFormat::F32,
            samples_per_frame: 1152,
            allow_overlay: true,
            clamp_seek: true,
            error_log_every: 50,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlayerConfig::from_json(r#"{ "seek_step_secs": 10.0, "pacing": "timed" }"#).unwrap();
        assert_eq!(config.seek_step_secs, 10.0);
        assert_eq!(config.pacing, Some(Pacing::Timed));
        assert_eq!(config.tick_interval_ms, 17);
        assert_eq!(config.samples_per_frame, 1152);
        assert!(config.allow_overlay);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(PlayerConfig::from_json("{ not json").is_err());
    }
}
