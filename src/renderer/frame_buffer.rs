use crate::core::{PlayerError, Result};
use log::{debug, error, info};

/// 一段可被显示服务器引用的内存
pub trait ShmRegion {
    /// 系统层面的段标识（SysV shmid 等）
    fn shm_id(&self) -> u32;

    fn as_slice(&self) -> &[u8];

    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// 共享内存的分配与注册
///
/// `allocate`/`free` 管理进程侧内存，`attach`/`detach` 管理显示服务器侧的段句柄。
pub trait ShmBackend {
    fn allocate(&mut self, size: usize) -> Result<Box<dyn ShmRegion>>;

    /// 向显示服务器注册，返回段句柄
    fn attach(&mut self, region: &dyn ShmRegion) -> Result<u32>;

    fn detach(&mut self, segment: u32) -> Result<()>;

    fn free(&mut self, region: Box<dyn ShmRegion>) -> Result<()>;
}

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Unallocated,
    Allocated,
    Attached,
    Detached,
    Freed,
}

/// 会话唯一的共享帧缓冲
///
/// 大小在创建时确定，之后不再改变。释放顺序固定为先 detach 后 free，
/// 各执行一次；无论走哪条退出路径（包括 Drop）都会执行。
pub struct SharedFrameBuffer {
    backend: Box<dyn ShmBackend>,
    region: Option<Box<dyn ShmRegion>>,
    segment: Option<u32>,
    size: usize,
    state: BufferState,
}

impl SharedFrameBuffer {
    /// 分配并注册
    pub fn create(mut backend: Box<dyn ShmBackend>, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PlayerError::SharedMemoryError("缓冲大小为 0".to_string()));
        }

        let region = backend.allocate(size)?;
        if region.as_slice().len() < size {
            let got = region.as_slice().len();
            if let Err(e) = backend.free(region) {
                error!("释放共享内存失败: {}", e);
            }
            return Err(PlayerError::SharedMemoryError(format!(
                "共享内存段过小: 需要 {} 字节, 实际 {} 字节",
                size, got
            )));
        }

        // attach 失败时只 free，不 detach
        let segment = match backend.attach(region.as_ref()) {
            Ok(segment) => segment,
            Err(e) => {
                if let Err(free_err) = backend.free(region) {
                    error!("释放共享内存失败: {}", free_err);
                }
                return Err(e);
            }
        };

        info!("📦 共享帧缓冲已就绪: {} 字节, 段 {:#x}", size, segment);
        Ok(Self {
            backend,
            region: Some(region),
            segment: Some(segment),
            size,
            state: BufferState::Attached,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// 显示服务器侧的段句柄（仅 Attached 状态有）
    pub fn segment(&self) -> Option<u32> {
        match self.state {
            BufferState::Attached => self.segment,
            _ => None,
        }
    }

    /// 可写视图，长度恰为 `size()`；未处于 Attached 状态时返回 None
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        if self.state != BufferState::Attached {
            return None;
        }
        let size = self.size;
        self.region.as_mut().map(|r| &mut r.as_mut_slice()[..size])
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        if self.state != BufferState::Attached {
            return None;
        }
        self.region.as_ref().map(|r| &r.as_slice()[..self.size])
    }

    /// 先 detach 再 free；可重复调用
    pub fn release(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(segment) = self.segment.take() {
            if let Err(e) = self.backend.detach(segment) {
                error!("共享内存 detach 失败: {}", e);
                first_error = Some(e);
            }
            self.state = BufferState::Detached;
        }

        if let Some(region) = self.region.take() {
            if let Err(e) = self.backend.free(region) {
                error!("共享内存释放失败: {}", e);
                first_error.get_or_insert(e);
            }
            self.state = BufferState::Freed;
            debug!("共享帧缓冲已释放");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SharedFrameBuffer {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub struct HeapRegion {
        id: u32,
        data: Vec<u8>,
    }

    impl ShmRegion for HeapRegion {
        fn shm_id(&self) -> u32 {
            self.id
        }

        fn as_slice(&self) -> &[u8] {
            &self.data
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut self.data
        }
    }

    /// 记录调用顺序的堆内存后端
    #[derive(Clone, Default)]
    pub struct RecordingShm {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub fail_attach: bool,
    }

    impl ShmBackend for RecordingShm {
        fn allocate(&mut self, size: usize) -> Result<Box<dyn ShmRegion>> {
            self.calls.lock().push(format!("allocate {}", size));
            Ok(Box::new(HeapRegion {
                id: 7,
                data: vec![0; size],
            }))
        }

        fn attach(&mut self, region: &dyn ShmRegion) -> Result<u32> {
            self.calls.lock().push(format!("attach {}", region.shm_id()));
            if self.fail_attach {
                return Err(PlayerError::SharedMemoryError("attach refused".to_string()));
            }
            Ok(0x42)
        }

        fn detach(&mut self, segment: u32) -> Result<()> {
            self.calls.lock().push(format!("detach {:#x}", segment));
            Ok(())
        }

        fn free(&mut self, _region: Box<dyn ShmRegion>) -> Result<()> {
            self.calls.lock().push("free".to_string());
            Ok(())
        }
    }
}
