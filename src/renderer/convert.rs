use crate::core::{PlanarFrame, PlayerError, Result};
use crate::renderer::frame_buffer::{SharedFrameBuffer, ShmBackend};
use crate::renderer::layout::packed_size;
use crate::renderer::strategy::{PresentStats, PresentationStrategy, ShmTarget, StrategyKind};
use log::{debug, error, info};

#[inline]
fn clamp_channel(v: i32) -> u8 {
    (v >> 16).clamp(0, 255) as u8
}

/// BT.601 全范围 YCbCr → RGB（16.16 定点）
#[inline]
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    // y * 0x10101 ≈ y << 16，加上舍入补偿
    let yy = y as i32 * 0x10101;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;

    let r = yy + 91881 * cr;
    let g = yy - 22554 * cb - 46802 * cr;
    let b = yy + 116130 * cb;
    (clamp_channel(r), clamp_channel(g), clamp_channel(b))
}

/// 把 4:2:0 平面帧转换成 BGRA 打包像素，逐行写入 `out`
///
/// `out` 至少 width × height × 4 字节，每像素字节顺序为 B, G, R, 0xFF。
pub fn convert_bgra(frame: &PlanarFrame<'_>, out: &mut [u8], width: usize, height: usize) {
    let row_bytes = width * 4;
    for (row, dst) in out.chunks_exact_mut(row_bytes).take(height).enumerate() {
        let y_row = frame.y.data.get(row * frame.y.stride..).unwrap_or(&[]);
        let cb_row = frame.cb.data.get((row / 2) * frame.cb.stride..).unwrap_or(&[]);
        let cr_row = frame.cr.data.get((row / 2) * frame.cr.stride..).unwrap_or(&[]);

        for (col, px) in dst.chunks_exact_mut(4).enumerate() {
            let y = y_row.get(col).copied().unwrap_or(0);
            let cb = cb_row.get(col / 2).copied().unwrap_or(128);
            let cr = cr_row.get(col / 2).copied().unwrap_or(128);
            let (r, g, b) = ycbcr_to_rgb(y, cb, cr);
            px.copy_from_slice(&[b, g, r, 0xFF]);
        }
    }
}

/// 软件转换策略
///
/// 共享缓冲存放 width × height 的 BGRA 像素，按原始尺寸显示，不缩放。
pub struct SoftwareConvert {
    buffer: SharedFrameBuffer,
    target: Box<dyn ShmTarget>,
    width: u32,
    height: u32,
    visible: bool,
    dirty: bool,
    has_frame: bool,
    stats: PresentStats,
}

impl SoftwareConvert {
    pub fn new(
        target: Box<dyn ShmTarget>,
        backend: Box<dyn ShmBackend>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let buffer = SharedFrameBuffer::create(backend, packed_size(width, height))?;
        info!("🖥 软件转换输出 {}x{} (BGRA)", width, height);
        Ok(Self {
            buffer,
            target,
            width,
            height,
            visible: true,
            dirty: false,
            has_frame: false,
            stats: PresentStats::default(),
        })
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.bytes()
    }

    fn put(&mut self) -> Result<()> {
        let segment = self
            .buffer
            .segment()
            .ok_or_else(|| PlayerError::SharedMemoryError("共享缓冲未注册".to_string()))?;
        self.target.put_image(segment, (self.width, self.height))?;
        self.stats.presents += 1;
        Ok(())
    }
}

impl PresentationStrategy for SoftwareConvert {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SoftwareConvert
    }

    fn prepare(&mut self, frame: &PlanarFrame<'_>) -> Result<()> {
        if !self.visible {
            self.stats.frames_skipped += 1;
            return Ok(());
        }
        let (width, height) = (self.width as usize, self.height as usize);
        let bytes = self
            .buffer
            .bytes_mut()
            .ok_or_else(|| PlayerError::SharedMemoryError("共享缓冲不可写".to_string()))?;
        convert_bgra(frame, bytes, width, height);

        self.dirty = true;
        self.has_frame = true;
        self.stats.frames_prepared += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        if !self.visible || !self.dirty {
            return Ok(());
        }
        self.dirty = false;
        self.put()
    }

    fn set_visible(&mut self, visible: bool) {
        debug!("软件输出可见性: {}", visible);
        self.visible = visible;
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.target.set_fullscreen(fullscreen)
    }

    fn expose(&mut self) -> Result<()> {
        if self.has_frame && self.visible {
            self.put()?;
        }
        Ok(())
    }

    fn stats(&self) -> PresentStats {
        self.stats
    }
}

impl Drop for SoftwareConvert {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.release() {
            error!("软件输出缓冲释放失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::frame_buffer::testing::RecordingShm;
    use crate::renderer::overlay::testing::{FilledPlanes, RecordingTarget};

    #[test]
    fn test_gray_and_extremes() {
        assert_eq!(ycbcr_to_rgb(0, 128, 128), (0, 0, 0));
        assert_eq!(ycbcr_to_rgb(128, 128, 128), (128, 128, 128));
        assert_eq!(ycbcr_to_rgb(255, 128, 128), (255, 255, 255));
    }

    #[test]
    fn test_primary_colors() {
        // 纯红在 BT.601 全范围下约为 (76, 85, 255)
        let (r, g, b) = ycbcr_to_rgb(76, 85, 255);
        assert!(r >= 253 && g <= 2 && b <= 2, "{} {} {}", r, g, b);
        let (r, g, b) = ycbcr_to_rgb(29, 255, 107);
        assert!(r <= 2 && g <= 2 && b >= 253, "{} {} {}", r, g, b);
    }

    #[test]
    fn test_fills_bgra_row_major() {
        let target = RecordingTarget::default();
        let mut convert = SoftwareConvert::new(
            Box::new(target.clone()),
            Box::new(RecordingShm::default()),
            64,
            48,
        )
        .unwrap();
        let planes = FilledPlanes::new(64, 48, (128, 128, 128));
        convert.prepare(&planes.frame()).unwrap();
        convert.present().unwrap();

        let buffer = convert.buffer().unwrap();
        assert_eq!(buffer.len(), 64 * 48 * 4);
        assert!(buffer.chunks_exact(4).all(|px| px == [128, 128, 128, 0xFF]));
        assert_eq!(*target.calls.lock(), vec!["image seg=0x42 64x48"]);
    }

    #[test]
    fn test_channel_order_is_bgr() {
        let planes = FilledPlanes::new(16, 16, (76, 85, 255));
        let mut out = vec![0u8; 16 * 16 * 4];
        convert_bgra(&planes.frame(), &mut out, 16, 16);
        assert!(out[0] <= 2);
        assert!(out[2] >= 253);
        assert_eq!(out[3], 0xFF);
    }
}
