use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 媒体源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// HTTP(S) 资源
    Http { url: String },

    /// 内置测试图案（不依赖解码器）
    TestPattern,
}

impl MediaSource {
    /// 从命令行参数解析媒体源
    pub fn from_arg(arg: &str) -> Self {
        if arg == "testsrc" {
            MediaSource::TestPattern
        } else if arg.starts_with("http://") || arg.starts_with("https://") {
            MediaSource::Http {
                url: arg.to_string(),
            }
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(arg))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::Http { .. })
    }

    /// 交给解码引擎的位置字符串（路径或 URL）
    pub fn location(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::Http { url } => url.clone(),
            MediaSource::TestPattern => "testsrc".to_string(),
        }
    }

    /// 窗口标题用的显示名（文件名或 URL 最后一段）
    pub fn display_name(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string()),
            MediaSource::Http { url } => url
                .rsplit('/')
                .find(|s| !s.is_empty())
                .and_then(|s| s.split('?').next())
                .unwrap_or(url.as_str())
                .to_string(),
            MediaSource::TestPattern => "testsrc".to_string(),
        }
    }

    /// 本地文件是否存在（网络源总是返回 true）
    pub fn is_reachable(&self) -> bool {
        match self {
            MediaSource::LocalFile(path) => Path::new(path).exists(),
            _ => true,
        }
    }
}

/// 流元数据，初始化后不可变
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub has_video: bool,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
    /// 帧率（帧/秒）
    pub framerate: f64,
    /// 采样率（Hz）
    pub sample_rate: u32,
    /// 总时长（秒），未知时为 None
    pub duration: Option<f64>,
}

impl StreamInfo {
    /// 单帧时长（秒）
    pub fn frame_interval(&self) -> f64 {
        if self.framerate > 0.0 {
            1.0 / self.framerate
        } else {
            0.0
        }
    }
}

/// 四字符码
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// 覆盖层像素格式（平面 YUV 4:2:0）
///
/// 两种格式只在色度平面的内存顺序上不同。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y, Cb, Cr
    I420,
    /// Y, Cr, Cb
    YV12,
}

impl PixelFormat {
    pub const fn fourcc(self) -> u32 {
        match self {
            PixelFormat::I420 => fourcc(b"I420"),
            PixelFormat::YV12 => fourcc(b"YV12"),
        }
    }

    pub fn from_fourcc(id: u32) -> Option<Self> {
        if id == PixelFormat::I420.fourcc() {
            Some(PixelFormat::I420)
        } else if id == PixelFormat::YV12.fourcc() {
            Some(PixelFormat::YV12)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::I420 => "I420",
            PixelFormat::YV12 => "YV12",
        }
    }

    /// Cr 是否排在 Cb 前面
    pub fn cr_first(self) -> bool {
        matches!(self, PixelFormat::YV12)
    }
}

/// 音频采样格式（交错立体声）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    S16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::S16 => 2,
        }
    }
}

/// 单个图像平面（借用自解码引擎）
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    /// 可见宽度（像素）
    pub width: u32,
    /// 可见高度（行）
    pub height: u32,
    /// 行跨度（字节），不小于 width
    pub stride: usize,
    pub data: &'a [u8],
}

impl<'a> Plane<'a> {
    /// 第 `row` 行的 `width` 字节，越界时返回截断后的切片
    pub fn row(&self, row: usize) -> &'a [u8] {
        let start = (row * self.stride).min(self.data.len());
        let end = (start + self.width as usize).min(self.data.len());
        &self.data[start..end]
    }
}

/// 解码后的平面 YCbCr 4:2:0 帧，仅在回调期间有效
#[derive(Debug, Clone, Copy)]
pub struct PlanarFrame<'a> {
    /// 显示时间（秒）
    pub time: f64,
    pub width: u32,
    pub height: u32,
    pub y: Plane<'a>,
    pub cb: Plane<'a>,
    pub cr: Plane<'a>,
}

/// 交错 PCM 样本
#[derive(Debug, Clone, Copy)]
pub enum SampleData<'a> {
    F32(&'a [f32]),
    S16(&'a [i16]),
}

impl<'a> SampleData<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleData::F32(_) => SampleFormat::F32,
            SampleData::S16(_) => SampleFormat::S16,
        }
    }

    /// 样本总数（所有声道）
    pub fn len(&self) -> usize {
        match self {
            SampleData::F32(s) => s.len(),
            SampleData::S16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 转成 f32 追加到 `out`
    pub fn extend_f32(&self, out: &mut Vec<f32>) {
        match self {
            SampleData::F32(s) => out.extend_from_slice(s),
            SampleData::S16(s) => out.extend(s.iter().map(|&v| v as f32 / 32768.0)),
        }
    }
}

/// 一块解码出来的音频
#[derive(Debug, Clone, Copy)]
pub struct AudioChunk<'a> {
    /// 第一个样本的媒体时间（秒）
    pub time: f64,
    /// 每声道样本数
    pub frames: usize,
    pub channels: u16,
    pub samples: SampleData<'a>,
}
