use crate::core::{PixelFormat, PlanarFrame, Result};
use crate::renderer::negotiate::{negotiate, FallbackReason, OverlayChoice, OverlayProbe};
use log::info;

/// 呈现策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// 平面 YUV 直接写入共享缓冲，由显示服务器缩放和转换
    HardwareOverlay,
    /// 在共享缓冲里转换成打包像素
    SoftwareConvert,
    /// 直接上传到 GPU 平面纹理
    NativeTexture,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::HardwareOverlay => "硬件覆盖层",
            StrategyKind::SoftwareConvert => "软件转换",
            StrategyKind::NativeTexture => "原生纹理",
        }
    }
}

/// 呈现计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentStats {
    pub frames_prepared: u64,
    /// 窗口不可见时跳过的帧（仍算作已处理）
    pub frames_skipped: u64,
    pub presents: u64,
}

/// 呈现策略
///
/// 启动时选定一次，之后主循环只通过这个接口和它打交道。
/// `prepare` 在解码回调里同步调用，`present` 在同一线程的 tick 末尾调用，二者不会重叠。
pub trait PresentationStrategy {
    fn kind(&self) -> StrategyKind;

    /// 把一帧写入共享缓冲或纹理
    fn prepare(&mut self, frame: &PlanarFrame<'_>) -> Result<()>;

    /// 把最近一次准备好的内容送到屏幕
    fn present(&mut self) -> Result<()>;

    fn set_visible(&mut self, _visible: bool) {}

    fn set_fullscreen(&mut self, _fullscreen: bool) -> Result<()> {
        Ok(())
    }

    /// 显示区域尺寸变化
    fn resize(&mut self, _width: u32, _height: u32) {}

    /// 窗口需要重绘
    fn expose(&mut self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> PresentStats;
}

/// 共享内存呈现目标（X 风格后端）
pub trait ShmTarget {
    /// 以覆盖层方式显示：缓冲按 `image`（宏块对齐后的平面尺寸）排布，
    /// 取其中 `video` 大小的区域缩放到 `output` 尺寸
    fn put_overlay(
        &mut self,
        port: u32,
        segment: u32,
        format: PixelFormat,
        image: (u32, u32),
        video: (u32, u32),
        output: (u32, u32),
    ) -> Result<()>;

    /// 以打包像素图像方式显示，不缩放
    fn put_image(&mut self, segment: u32, video: (u32, u32)) -> Result<()>;

    fn set_fullscreen(&mut self, _fullscreen: bool) -> Result<()> {
        Ok(())
    }

    /// 释放独占的覆盖层端口
    fn release_port(&mut self, _port: u32) -> Result<()> {
        Ok(())
    }
}

/// 启动时的策略选择结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyPlan {
    Overlay(OverlayChoice),
    Software(FallbackReason),
}

impl StrategyPlan {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyPlan::Overlay(_) => StrategyKind::HardwareOverlay,
            StrategyPlan::Software(_) => StrategyKind::SoftwareConvert,
        }
    }
}

/// X 风格后端的策略选择：覆盖层 → 软件转换
///
/// 结果只取决于探测结果，会话期间不再重试。
pub fn plan_shm_strategy(probe: &mut dyn OverlayProbe, allow_overlay: bool) -> StrategyPlan {
    let plan = if allow_overlay {
        match negotiate(probe) {
            Ok(choice) => StrategyPlan::Overlay(choice),
            Err(reason) => StrategyPlan::Software(reason),
        }
    } else {
        StrategyPlan::Software(FallbackReason::Disabled)
    };
    info!("呈现策略: {}", plan.kind().name());
    plan
}
