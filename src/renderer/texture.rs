use crate::core::{PlanarFrame, Result};
use crate::renderer::strategy::{PresentStats, PresentationStrategy, StrategyKind};
use log::info;

/// 平面 YUV 纹理目标（SDL 风格后端）
pub trait YuvTarget {
    /// 按各平面自己的跨度上传 Y、Cb、Cr，不做重排
    fn update_yuv(&mut self, frame: &PlanarFrame<'_>) -> Result<()>;

    /// 清屏、绘制纹理、交换缓冲
    fn render(&mut self) -> Result<()>;

    fn set_fullscreen(&mut self, _fullscreen: bool) -> Result<()> {
        Ok(())
    }
}

/// 原生纹理策略：没有共享缓冲，颜色转换在 GPU 采样时完成
pub struct NativeTexture {
    target: Box<dyn YuvTarget>,
    stats: PresentStats,
}

impl NativeTexture {
    pub fn new(target: Box<dyn YuvTarget>) -> Self {
        info!("🖥 使用原生 YUV 纹理输出");
        Self {
            target,
            stats: PresentStats::default(),
        }
    }
}

impl PresentationStrategy for NativeTexture {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NativeTexture
    }

    fn prepare(&mut self, frame: &PlanarFrame<'_>) -> Result<()> {
        self.target.update_yuv(frame)?;
        self.stats.frames_prepared += 1;
        Ok(())
    }

    /// 每个 tick 都呈现一次，由垂直同步限速
    fn present(&mut self) -> Result<()> {
        self.target.render()?;
        self.stats.presents += 1;
        Ok(())
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.target.set_fullscreen(fullscreen)
    }

    fn stats(&self) -> PresentStats {
        self.stats
    }
}
