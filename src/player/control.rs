use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, info};

/// 控制通道容量，输入监听线程在满时阻塞
pub const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// 与平台无关的按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Q,
    Escape,
    Space,
    P,
    F,
    F11,
    Left,
    Right,
    Other,
}

/// 离散控制消息
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    Quit,
    TogglePause,
    ToggleFullscreen,
    /// 相对当前引擎时间跳转（秒）
    SeekBy(f64),
    /// 窗口可见性变化
    Visibility(bool),
    /// 窗口尺寸变化
    Resize { width: u32, height: u32 },
    /// 窗口需要重绘
    Expose,
}

impl ControlEvent {
    /// 按键映射：Q/Esc 退出，空格/P 暂停，F/F11 全屏，左右方向键跳转
    pub fn from_key(key: Key, seek_step: f64) -> Option<Self> {
        match key {
            Key::Q | Key::Escape => Some(ControlEvent::Quit),
            Key::Space | Key::P => Some(ControlEvent::TogglePause),
            Key::F | Key::F11 => Some(ControlEvent::ToggleFullscreen),
            Key::Right => Some(ControlEvent::SeekBy(seek_step)),
            Key::Left => Some(ControlEvent::SeekBy(-seek_step)),
            Key::Other => None,
        }
    }
}

/// 控制状态
///
/// {运行, 暂停} × {可见, 遮挡} × {窗口, 全屏}，外加一个待执行的跳转目标。
/// 只在节拍器的输入轮询步骤里修改。
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub running: bool,
    pub paused: bool,
    pub visible: bool,
    pub fullscreen: bool,
    /// 待执行的跳转目标（秒），None 表示没有
    pub pending_seek: Option<f64>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            running: true,
            paused: false,
            visible: true,
            fullscreen: false,
            pending_seek: None,
        }
    }
}

/// 事件对显示端的副作用，由会话转交给呈现策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayEffect {
    Fullscreen(bool),
    Visibility(bool),
    Resize { width: u32, height: u32 },
    Expose,
}

impl ControlState {
    /// 应用一个事件
    ///
    /// `now` 为引擎当前时间，`duration` 为已知总时长；`clamp` 为 true 时跳转目标
    /// 限制在 [0, duration] 内。
    pub fn apply(
        &mut self,
        event: ControlEvent,
        now: f64,
        duration: Option<f64>,
        clamp: bool,
    ) -> Option<DisplayEffect> {
        match event {
            ControlEvent::Quit => {
                info!("收到退出请求");
                self.running = false;
                None
            }
            ControlEvent::TogglePause => {
                self.paused = !self.paused;
                info!("{}", if self.paused { "⏸ 暂停" } else { "▶ 继续" });
                None
            }
            ControlEvent::ToggleFullscreen => {
                self.fullscreen = !self.fullscreen;
                Some(DisplayEffect::Fullscreen(self.fullscreen))
            }
            ControlEvent::SeekBy(delta) => {
                let mut target = now + delta;
                if clamp {
                    target = target.max(0.0);
                    if let Some(duration) = duration {
                        target = target.min(duration);
                    }
                }
                debug!("跳转请求: {:.3}s {:+.1}s → {:.3}s", now, delta, target);
                self.pending_seek = Some(target);
                None
            }
            ControlEvent::Visibility(visible) => {
                if self.visible == visible {
                    return None;
                }
                self.visible = visible;
                Some(DisplayEffect::Visibility(visible))
            }
            ControlEvent::Resize { width, height } => Some(DisplayEffect::Resize { width, height }),
            ControlEvent::Expose => Some(DisplayEffect::Expose),
        }
    }

    /// 取出待执行的跳转（读后清空）
    pub fn take_seek(&mut self) -> Option<f64> {
        self.pending_seek.take()
    }
}

/// 输入事件源，每个 tick 轮询一次，不阻塞
pub trait EventSource {
    fn poll(&mut self, out: &mut Vec<ControlEvent>);
}

/// 没有窗口时使用的空事件源
#[derive(Debug, Default)]
pub struct NoEvents;

impl EventSource for NoEvents {
    fn poll(&mut self, _out: &mut Vec<ControlEvent>) {}
}

/// 由后台监听线程喂入的事件源
///
/// 监听线程只持有发送端；主循环每个 tick 把通道里的消息取空。
/// 发送端全部断开时视为显示连接已关闭，产出一次 Quit。
pub struct ChannelEvents {
    rx: Receiver<ControlEvent>,
    disconnected: bool,
}

impl ChannelEvents {
    pub fn new(rx: Receiver<ControlEvent>) -> Self {
        Self {
            rx,
            disconnected: false,
        }
    }
}

/// 创建控制通道
pub fn control_channel() -> (Sender<ControlEvent>, ChannelEvents) {
    let (tx, rx) = bounded(CONTROL_CHANNEL_CAPACITY);
    (tx, ChannelEvents::new(rx))
}

impl EventSource for ChannelEvents {
    fn poll(&mut self, out: &mut Vec<ControlEvent>) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        self.disconnected = true;
                        info!("输入监听已断开，结束播放");
                        out.push(ControlEvent::Quit);
                    }
                    break;
                }
            }
        }
    }
}
