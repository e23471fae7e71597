use crate::core::{Plane, PlanarFrame, PlayerError, Result};
use crate::renderer::frame_buffer::{SharedFrameBuffer, ShmBackend};
use crate::renderer::layout::PlaneLayout;
use crate::renderer::negotiate::OverlayChoice;
use crate::renderer::strategy::{PresentStats, PresentationStrategy, ShmTarget, StrategyKind};
use log::{debug, error, info};

/// 按行拷贝一个平面
///
/// 跨度相同时整体拷贝（包括填充区）；不同时逐行拷贝，每行取两者较短的跨度。
pub(crate) fn copy_plane(dst: &mut [u8], dst_stride: usize, src: &Plane<'_>) {
    if src.stride == 0 || dst_stride == 0 {
        return;
    }
    if src.stride == dst_stride {
        let n = dst.len().min(src.data.len());
        dst[..n].copy_from_slice(&src.data[..n]);
        return;
    }
    let width = dst_stride.min(src.stride);
    for (dst_row, src_row) in dst.chunks_mut(dst_stride).zip(src.data.chunks(src.stride)) {
        let n = width.min(src_row.len()).min(dst_row.len());
        dst_row[..n].copy_from_slice(&src_row[..n]);
    }
}

/// 硬件覆盖层策略
///
/// 共享缓冲按宏块对齐布局存放 Y 和两个色度平面，色度顺序由协商出的格式决定。
/// 不做颜色转换，缩放由显示服务器完成。
pub struct HardwareOverlay {
    // 先于 target 释放：缓冲 detach/free 时连接仍然有效
    buffer: SharedFrameBuffer,
    target: Box<dyn ShmTarget>,
    layout: PlaneLayout,
    choice: OverlayChoice,
    video: (u32, u32),
    output: (u32, u32),
    visible: bool,
    dirty: bool,
    has_frame: bool,
    stats: PresentStats,
}

impl HardwareOverlay {
    /// 创建共享缓冲；失败时释放已独占的端口
    pub fn new(
        mut target: Box<dyn ShmTarget>,
        backend: Box<dyn ShmBackend>,
        choice: OverlayChoice,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let layout = PlaneLayout::macroblock(width, height);
        let buffer = match SharedFrameBuffer::create(backend, layout.frame_size()) {
            Ok(buffer) => buffer,
            Err(e) => {
                if let Err(release_err) = target.release_port(choice.port) {
                    error!("释放覆盖层端口失败: {}", release_err);
                }
                return Err(e);
            }
        };

        info!(
            "🖥 覆盖层输出 {}x{} ({}), 平面 {}x{} / {}x{}",
            width,
            height,
            choice.format.name(),
            layout.luma_width,
            layout.luma_height,
            layout.chroma_width,
            layout.chroma_height
        );

        Ok(Self {
            buffer,
            target,
            layout,
            choice,
            video: (width, height),
            output: (width, height),
            visible: true,
            dirty: false,
            has_frame: false,
            stats: PresentStats::default(),
        })
    }

    pub fn layout(&self) -> PlaneLayout {
        self.layout
    }

    /// 共享缓冲内容（测试与诊断用）
    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.bytes()
    }

    fn put(&mut self) -> Result<()> {
        let segment = self
            .buffer
            .segment()
            .ok_or_else(|| PlayerError::SharedMemoryError("共享缓冲未注册".to_string()))?;
        self.target.put_overlay(
            self.choice.port,
            segment,
            self.choice.format,
            (self.layout.luma_width as u32, self.layout.luma_height as u32),
            self.video,
            self.output,
        )?;
        self.stats.presents += 1;
        Ok(())
    }
}

impl PresentationStrategy for HardwareOverlay {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HardwareOverlay
    }

    fn prepare(&mut self, frame: &PlanarFrame<'_>) -> Result<()> {
        if !self.visible {
            self.stats.frames_skipped += 1;
            return Ok(());
        }

        let layout = self.layout;
        let format = self.choice.format;
        let bytes = self
            .buffer
            .bytes_mut()
            .ok_or_else(|| PlayerError::SharedMemoryError("共享缓冲不可写".to_string()))?;

        copy_plane(&mut bytes[layout.luma_range()], layout.luma_width, &frame.y);
        copy_plane(&mut bytes[layout.cb_range(format)], layout.chroma_width, &frame.cb);
        copy_plane(&mut bytes[layout.cr_range(format)], layout.chroma_width, &frame.cr);

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
        debug!("覆盖层可见性: {}", visible);
        self.visible = visible;
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        self.target.set_fullscreen(fullscreen)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.output = (width, height);
        self.dirty = self.has_frame;
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

impl Drop for HardwareOverlay {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.release() {
            error!("覆盖层缓冲释放失败: {}", e);
        }
        if let Err(e) = self.target.release_port(self.choice.port) {
            error!("释放覆盖层端口失败: {}", e);
        }
        debug!("覆盖层已关闭，端口 {}", self.choice.port);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::PixelFormat;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// 记录呈现调用的目标
    #[derive(Clone, Default)]
    pub struct RecordingTarget {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl ShmTarget for RecordingTarget {
        fn put_overlay(
            &mut self,
            port: u32,
            segment: u32,
            format: PixelFormat,
            image: (u32, u32),
            video: (u32, u32),
            output: (u32, u32),
        ) -> Result<()> {
            self.calls.lock().push(format!(
                "overlay port={} seg={:#x} {} {}x{} of {}x{}->{}x{}",
                port,
                segment,
                format.name(),
                video.0,
                video.1,
                image.0,
                image.1,
                output.0,
                output.1
            ));
            Ok(())
        }

        fn put_image(&mut self, segment: u32, video: (u32, u32)) -> Result<()> {
            self.calls
                .lock()
                .push(format!("image seg={:#x} {}x{}", segment, video.0, video.1));
            Ok(())
        }

        fn release_port(&mut self, port: u32) -> Result<()> {
            self.calls.lock().push(format!("release {}", port));
            Ok(())
        }
    }

    /// 三个平面分别填充固定值的帧数据
    pub struct FilledPlanes {
        pub width: u32,
        pub height: u32,
        pub y: Vec<u8>,
        pub cb: Vec<u8>,
        pub cr: Vec<u8>,
        pub luma_stride: usize,
        pub chroma_stride: usize,
    }

    impl FilledPlanes {
        pub fn new(width: u32, height: u32, values: (u8, u8, u8)) -> Self {
            let layout = PlaneLayout::macroblock(width, height);
            Self {
                width,
                height,
                y: vec![values.0; layout.luma_size()],
                cb: vec![values.1; layout.chroma_size()],
                cr: vec![values.2; layout.chroma_size()],
                luma_stride: layout.luma_width,
                chroma_stride: layout.chroma_width,
            }
        }

        pub fn frame(&self) -> PlanarFrame<'_> {
            let (cw, ch) = ((self.width + 1) / 2, (self.height + 1) / 2);
            PlanarFrame {
                time: 0.0,
                width: self.width,
                height: self.height,
                y: Plane {
                    width: self.width,
                    height: self.height,
                    stride: self.luma_stride,
                    data: &self.y,
                },
                cb: Plane {
                    width: cw,
                    height: ch,
                    stride: self.chroma_stride,
                    data: &self.cb,
                },
                cr: Plane {
                    width: cw,
                    height: ch,
                    stride: self.chroma_stride,
                    data: &self.cr,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::core::PixelFormat;
    use crate::renderer::frame_buffer::testing::RecordingShm;

    fn overlay(format: PixelFormat) -> (HardwareOverlay, RecordingTarget, RecordingShm) {
        let target = RecordingTarget::default();
        let shm = RecordingShm::default();
        let choice = OverlayChoice {
            adaptor: "test".to_string(),
            port: 61,
            format,
        };
        let overlay =
            HardwareOverlay::new(Box::new(target.clone()), Box::new(shm.clone()), choice, 64, 48)
                .unwrap();
        (overlay, target, shm)
    }

    #[test]
    fn test_plane_order_i420() {
        let (mut overlay, _, _) = overlay(PixelFormat::I420);
        let planes = FilledPlanes::new(64, 48, (16, 100, 200));
        overlay.prepare(&planes.frame()).unwrap();

        let layout = overlay.layout();
        let buffer = overlay.buffer().unwrap();
        assert!(buffer[layout.luma_range()].iter().all(|&b| b == 16));
        assert!(buffer[layout.cb_range(PixelFormat::I420)].iter().all(|&b| b == 100));
        assert!(buffer[layout.luma_size()..layout.luma_size() + layout.chroma_size()]
            .iter()
            .all(|&b| b == 100));
    }

    #[test]
    fn test_plane_order_yv12_swaps_chroma() {
        let (mut overlay, _, _) = overlay(PixelFormat::YV12);
        let planes = FilledPlanes::new(64, 48, (16, 100, 200));
        overlay.prepare(&planes.frame()).unwrap();

        let layout = overlay.layout();
        let buffer = overlay.buffer().unwrap();
        let first = layout.luma_size()..layout.luma_size() + layout.chroma_size();
        assert!(buffer[first].iter().all(|&b| b == 200));
        assert!(buffer[layout.frame_size() - layout.chroma_size()..]
            .iter()
            .all(|&b| b == 100));
    }

    #[test]
    fn test_invisible_skips_copy_but_counts() {
        let (mut overlay, target, _) = overlay(PixelFormat::I420);
        overlay.set_visible(false);
        let planes = FilledPlanes::new(64, 48, (16, 100, 200));
        overlay.prepare(&planes.frame()).unwrap();
        overlay.present().unwrap();

        assert!(overlay.buffer().unwrap().iter().all(|&b| b == 0));
        assert_eq!(overlay.stats().frames_skipped, 1);
        assert!(target.calls.lock().is_empty());
    }

    #[test]
    fn test_present_only_after_prepare_and_resize_scales() {
        let (mut overlay, target, _) = overlay(PixelFormat::I420);
        overlay.present().unwrap();
        assert!(target.calls.lock().is_empty());

        let planes = FilledPlanes::new(64, 48, (1, 2, 3));
        overlay.prepare(&planes.frame()).unwrap();
        overlay.present().unwrap();
        overlay.present().unwrap();
        overlay.resize(128, 96);
        overlay.present().unwrap();

        assert_eq!(
            *target.calls.lock(),
            vec![
                "overlay port=61 seg=0x42 I420 64x48 of 64x48->64x48",
                "overlay port=61 seg=0x42 I420 64x48 of 64x48->128x96",
            ]
        );
    }

    #[test]
    fn test_put_describes_padded_image() {
        let target = RecordingTarget::default();
        let choice = OverlayChoice {
            adaptor: "test".to_string(),
            port: 61,
            format: PixelFormat::I420,
        };
        let mut overlay = HardwareOverlay::new(
            Box::new(target.clone()),
            Box::new(RecordingShm::default()),
            choice,
            1920,
            1080,
        )
        .unwrap();
        let planes = FilledPlanes::new(1920, 1080, (16, 128, 128));
        overlay.prepare(&planes.frame()).unwrap();
        overlay.present().unwrap();

        // 服务器按图像尺寸推算平面偏移，Cb 必须从 1920×1088 开始
        assert_eq!(overlay.layout().cb_range(PixelFormat::I420).start, 1920 * 1088);
        assert_eq!(
            *target.calls.lock(),
            vec!["overlay port=61 seg=0x42 I420 1920x1080 of 1920x1088->1920x1080"]
        );
    }

    #[test]
    fn test_drop_releases_buffer_then_port() {
        let (overlay, target, shm) = overlay(PixelFormat::I420);
        drop(overlay);
        assert_eq!(shm.calls.lock().last().map(String::as_str), Some("free"));
        assert_eq!(*target.calls.lock(), vec!["release 61"]);
    }

    #[test]
    fn test_buffer_failure_releases_port() {
        let target = RecordingTarget::default();
        let shm = RecordingShm {
            fail_attach: true,
            ..RecordingShm::default()
        };
        let choice = OverlayChoice {
            adaptor: "test".to_string(),
            port: 61,
            format: PixelFormat::I420,
        };
        assert!(
            HardwareOverlay::new(Box::new(target.clone()), Box::new(shm), choice, 64, 48).is_err()
        );
        assert_eq!(*target.calls.lock(), vec!["release 61"]);
    }

    #[test]
    fn test_copy_plane_with_narrower_destination() {
        let src_data: Vec<u8> = (0..12).collect();
        let src = Plane {
            width: 3,
            height: 3,
            stride: 4,
            data: &src_data,
        };
        let mut dst = vec![0u8; 9];
        copy_plane(&mut dst, 3, &src);
        assert_eq!(dst, vec![0, 1, 2, 4, 5, 6, 8, 9, 10]);
    }
}
