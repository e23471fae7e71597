use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 墙钟 - 节拍器用它计算每个 tick 的流逝时间
pub trait WallClock {
    /// 自时钟创建以来经过的时间
    fn now(&self) -> Duration;

    /// 阻塞当前线程
    fn sleep(&self, duration: Duration);
}

/// 系统单调时钟
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 手动推进的时钟（测试与离线回放用）
///
/// `sleep` 不会阻塞，只把时间往前拨。克隆出来的句柄共享同一个时间。
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Debug, Default)]
struct ManualInner {
    now: Duration,
    slept: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 向前推进
    pub fn advance(&self, by: Duration) {
        self.inner.lock().now += by;
    }

    /// 设置绝对时间
    pub fn set(&self, now: Duration) {
        self.inner.lock().now = now;
    }

    /// 累计 sleep 的时长
    pub fn total_slept(&self) -> Duration {
        self.inner.lock().slept
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.now += duration;
        inner.slept += duration;
    }
}
