use crate::core::{PixelFormat, Result};
use log::{debug, info, warn};
use std::fmt;

/// 覆盖层适配器描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptorInfo {
    pub name: String,
    pub base_port: u32,
    pub num_ports: u16,
    /// 支持图像上传
    pub supports_image: bool,
    /// 支持输入端口
    pub supports_input: bool,
}

impl AdaptorInfo {
    pub fn ports(&self) -> impl Iterator<Item = u32> {
        let base = self.base_port;
        (0..self.num_ports as u32).map(move |i| base + i)
    }
}

/// 覆盖层能力查询接口，由平台实现
pub trait OverlayProbe {
    /// 显示服务器是否提供覆盖层扩展
    fn extension_present(&mut self) -> bool {
        true
    }

    fn adaptors(&mut self) -> Result<Vec<AdaptorInfo>>;

    /// 端口支持的图像格式（FourCC）
    fn image_formats(&mut self, port: u32) -> Result<Vec<u32>>;

    /// 独占端口；被占用时返回 Ok(false)
    fn grab_port(&mut self, port: u32) -> Result<bool>;
}

/// 协商成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayChoice {
    pub adaptor: String,
    pub port: u32,
    pub format: PixelFormat,
}

/// 回退到软件转换的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// 配置禁用
    Disabled,
    NoExtension,
    /// 没有同时支持图像与输入的适配器
    NoAdaptor,
    /// 可用适配器都不支持 I420/YV12
    NoFormat,
    /// 端口全部被占用
    NoPort,
    QueryFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Disabled => write!(f, "覆盖层已禁用"),
            FallbackReason::NoExtension => write!(f, "显示服务器没有覆盖层扩展"),
            FallbackReason::NoAdaptor => write!(f, "没有可用的覆盖层适配器"),
            FallbackReason::NoFormat => write!(f, "没有 I420/YV12 格式"),
            FallbackReason::NoPort => write!(f, "没有可独占的端口"),
            FallbackReason::QueryFailed(e) => write!(f, "查询失败: {}", e),
        }
    }
}

/// 从格式列表里选格式：I420 优先，其次 YV12
pub fn pick_format(formats: &[u32]) -> Option<PixelFormat> {
    [PixelFormat::I420, PixelFormat::YV12]
        .into_iter()
        .find(|f| formats.contains(&f.fourcc()))
}

/// 协商覆盖层
///
/// 按顺序遍历适配器，跳过不同时支持图像与输入的；对每个可用适配器先选格式，
/// 再依次尝试独占端口，第一个成功的即为结果。
pub fn negotiate(probe: &mut dyn OverlayProbe) -> std::result::Result<OverlayChoice, FallbackReason> {
    let outcome = negotiate_inner(probe);
    match &outcome {
        Ok(choice) => info!(
            "🎬 覆盖层: 适配器 \"{}\", 端口 {}, 格式 {}",
            choice.adaptor,
            choice.port,
            choice.format.name()
        ),
        Err(reason) => warn!("覆盖层不可用（{}），使用软件转换", reason),
    }
    outcome
}

fn negotiate_inner(probe: &mut dyn OverlayProbe) -> std::result::Result<OverlayChoice, FallbackReason> {
    if !probe.extension_present() {
        return Err(FallbackReason::NoExtension);
    }

    let adaptors = probe
        .adaptors()
        .map_err(|e| FallbackReason::QueryFailed(e.to_string()))?;
    debug!("覆盖层适配器数量: {}", adaptors.len());

    let mut usable = 0;
    let mut with_format = 0;

    for adaptor in &adaptors {
        if !(adaptor.supports_image && adaptor.supports_input) {
            debug!("跳过适配器 \"{}\": 能力不足", adaptor.name);
            continue;
        }
        usable += 1;

        let formats = probe
            .image_formats(adaptor.base_port)
            .map_err(|e| FallbackReason::QueryFailed(e.to_string()))?;
        let Some(format) = pick_format(&formats) else {
            debug!("跳过适配器 \"{}\": 没有可用格式", adaptor.name);
            continue;
        };
        with_format += 1;

        for port in adaptor.ports() {
            match probe.grab_port(port) {
                Ok(true) => {
                    return Ok(OverlayChoice {
                        adaptor: adaptor.name.clone(),
                        port,
                        format,
                    })
                }
                Ok(false) => debug!("端口 {} 已被占用", port),
                Err(e) => debug!("独占端口 {} 失败: {}", port, e),
            }
        }
    }

    if usable == 0 {
        Err(FallbackReason::NoAdaptor)
    } else if with_format == 0 {
        Err(FallbackReason::NoFormat)
    } else {
        Err(FallbackReason::NoPort)
    }
}
