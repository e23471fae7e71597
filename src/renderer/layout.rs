use crate::core::PixelFormat;
use std::ops::Range;

/// 覆盖层缓冲的平面布局（宏块对齐）
///
/// 亮度宽高向上取整到 16 的倍数，色度为其一半（即 8 的倍数）。
/// 内存中依次是 Y、第一个色度平面、第二个色度平面，顺序由像素格式决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub luma_width: usize,
    pub luma_height: usize,
    pub chroma_width: usize,
    pub chroma_height: usize,
}

impl PlaneLayout {
    pub fn macroblock(width: u32, height: u32) -> Self {
        let mb_width = ((width as usize) + 15) >> 4;
        let mb_height = ((height as usize) + 15) >> 4;
        Self {
            luma_width: mb_width << 4,
            luma_height: mb_height << 4,
            chroma_width: mb_width << 3,
            chroma_height: mb_height << 3,
        }
    }

    pub fn luma_size(&self) -> usize {
        self.luma_width * self.luma_height
    }

    pub fn chroma_size(&self) -> usize {
        self.chroma_width * self.chroma_height
    }

    /// 整帧字节数 = 亮度 + 2 × 色度
    pub fn frame_size(&self) -> usize {
        self.luma_size() + 2 * self.chroma_size()
    }

    pub fn luma_range(&self) -> Range<usize> {
        0..self.luma_size()
    }

    /// Cb 平面在缓冲中的位置
    pub fn cb_range(&self, format: PixelFormat) -> Range<usize> {
        if format.cr_first() {
            self.second_chroma()
        } else {
            self.first_chroma()
        }
    }

    /// Cr 平面在缓冲中的位置
    pub fn cr_range(&self, format: PixelFormat) -> Range<usize> {
        if format.cr_first() {
            self.first_chroma()
        } else {
            self.second_chroma()
        }
    }

    fn first_chroma(&self) -> Range<usize> {
        let start = self.luma_size();
        start..start + self.chroma_size()
    }

    fn second_chroma(&self) -> Range<usize> {
        let start = self.luma_size() + self.chroma_size();
        start..start + self.chroma_size()
    }
}

/// 打包 4 字节/像素缓冲大小
pub fn packed_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}
