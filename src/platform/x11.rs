use crate::core::{PixelFormat, PlayerError, Result};
use crate::player::control::{ControlEvent, Key};
use crate::renderer::{AdaptorInfo, OverlayProbe, ShmBackend, ShmRegion, ShmTarget};
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::properties::WmSizeHints;
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ClientMessageEvent, ConnectionExt as _, CreateGCAux, CreateWindowAux,
    EventMask, Gcontext, ImageFormat, PropMode, Visibility, Window, WindowClass,
};
use x11rb::protocol::xv::{self, ConnectionExt as _, GrabPortStatus};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

/// 两次点击间隔小于该值视为双击（毫秒）
const DOUBLE_CLICK_MS: u32 = 400;

fn display_err(e: impl std::fmt::Display) -> PlayerError {
    PlayerError::DisplayError(e.to_string())
}

/// X 键码 → 按键（标准 evdev 键盘布局）
pub fn key_from_keycode(keycode: u8) -> Key {
    match keycode {
        24 => Key::Q,
        9 => Key::Escape,
        65 => Key::Space,
        33 => Key::P,
        41 => Key::F,
        95 => Key::F11,
        113 => Key::Left,
        114 => Key::Right,
        _ => Key::Other,
    }
}

#[derive(Debug, Clone, Copy)]
struct Atoms {
    wm_protocols: Atom,
    wm_delete_window: Atom,
    net_wm_state: Atom,
    net_wm_state_fullscreen: Atom,
    stop: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self> {
        let intern = |name: &[u8]| -> Result<Atom> {
            Ok(conn
                .intern_atom(false, name)
                .map_err(display_err)?
                .reply()
                .map_err(display_err)?
                .atom)
        };
        Ok(Self {
            wm_protocols: intern(b"WM_PROTOCOLS")?,
            wm_delete_window: intern(b"WM_DELETE_WINDOW")?,
            net_wm_state: intern(b"_NET_WM_STATE")?,
            net_wm_state_fullscreen: intern(b"_NET_WM_STATE_FULLSCREEN")?,
            stop: intern(b"_MPG_PLAYER_STOP")?,
        })
    }
}

/// X11 窗口与连接
pub struct X11Display {
    conn: Arc<RustConnection>,
    root: Window,
    window: Window,
    gc: Gcontext,
    depth: u8,
    atoms: Atoms,
    listener: Option<JoinHandle<()>>,
}

impl X11Display {
    /// 连接显示服务器并创建窗口
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).map_err(display_err)?;
        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| PlayerError::DisplayError(format!("屏幕 {} 不存在", screen_num)))?;
        let (root, depth, visual, black) = (
            screen.root,
            screen.root_depth,
            screen.root_visual,
            screen.black_pixel,
        );

        let window = conn.generate_id().map_err(display_err)?;
        conn.create_window(
            depth,
            window,
            root,
            0,
            0,
            width as u16,
            height as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new().background_pixel(black).event_mask(
                EventMask::KEY_PRESS
                    | EventMask::BUTTON_PRESS
                    | EventMask::EXPOSURE
                    | EventMask::STRUCTURE_NOTIFY
                    | EventMask::VISIBILITY_CHANGE,
            ),
        )
        .map_err(display_err)?;

        let gc = conn.generate_id().map_err(display_err)?;
        conn.create_gc(gc, window, &CreateGCAux::new())
            .map_err(display_err)?;

        let atoms = Atoms::intern(&conn)?;
        conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            title.as_bytes(),
        )
        .map_err(display_err)?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.wm_protocols,
            AtomEnum::ATOM,
            &[atoms.wm_delete_window],
        )
        .map_err(display_err)?;

        conn.map_window(window).map_err(display_err)?;
        conn.flush().map_err(display_err)?;

        info!("🪟 X11 窗口已创建: {}x{}, 深度 {}", width, height, depth);

        Ok(Self {
            conn: Arc::new(conn),
            root,
            window,
            gc,
            depth,
            atoms,
            listener: None,
        })
    }

    /// 软件输出不缩放，窗口固定为视频尺寸
    pub fn fix_size(&self, width: u32, height: u32) -> Result<()> {
        let mut hints = WmSizeHints::new();
        hints.min_size = Some((width as i32, height as i32));
        hints.max_size = Some((width as i32, height as i32));
        hints
            .set_normal_hints(self.conn.as_ref(), self.window)
            .map_err(display_err)?;
        self.conn.flush().map_err(display_err)?;
        Ok(())
    }

    pub fn probe(&self) -> XvProbe {
        XvProbe {
            conn: self.conn.clone(),
            window: self.window,
        }
    }

    /// MIT-SHM 共享内存后端
    pub fn shm_backend(&self) -> Result<SysvShm> {
        let present = self
            .conn
            .extension_information(shm::X11_EXTENSION_NAME)
            .map_err(display_err)?
            .is_some();
        if !present {
            return Err(PlayerError::SharedMemoryError(
                "显示服务器不支持 MIT-SHM".to_string(),
            ));
        }
        Ok(SysvShm {
            conn: self.conn.clone(),
        })
    }

    pub fn target(&self) -> X11Target {
        X11Target {
            conn: self.conn.clone(),
            root: self.root,
            window: self.window,
            gc: self.gc,
            depth: self.depth,
            atoms: self.atoms,
        }
    }

    /// 端口支持时打开垂直同步
    pub fn enable_vblank_sync(&self, port: u32) {
        let result = (|| -> Result<bool> {
            let attributes = self
                .conn
                .xv_query_port_attributes(port)
                .map_err(display_err)?
                .reply()
                .map_err(display_err)?;
            let name = b"XV_SYNC_TO_VBLANK";
            let supported = attributes
                .attributes
                .iter()
                .any(|a| a.name.split(|&b| b == 0).next() == Some(&name[..]));
            if !supported {
                return Ok(false);
            }
            let atom = self
                .conn
                .intern_atom(false, name)
                .map_err(display_err)?
                .reply()
                .map_err(display_err)?
                .atom;
            self.conn
                .xv_set_port_attribute(port, atom, 1)
                .map_err(display_err)?;
            Ok(true)
        })();
        match result {
            Ok(true) => debug!("端口 {} 已开启 XV_SYNC_TO_VBLANK", port),
            Ok(false) => {}
            Err(e) => warn!("设置 XV_SYNC_TO_VBLANK 失败: {}", e),
        }
    }

    /// 启动后台输入监听线程，事件通过通道送给主循环
    pub fn spawn_listener(&mut self, tx: Sender<ControlEvent>, seek_step: f64) -> Result<()> {
        let conn = self.conn.clone();
        let atoms = self.atoms;
        let window = self.window;
        let handle = thread::Builder::new()
            .name("x11-events".to_string())
            .spawn(move || listen(conn, window, atoms, tx, seek_step))
            .map_err(|e| PlayerError::DisplayError(format!("无法启动输入监听线程: {}", e)))?;
        self.listener = Some(handle);
        Ok(())
    }
}

impl Drop for X11Display {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.take() {
            // 给自己的窗口发一条停止消息，唤醒阻塞中的监听线程
            let event = ClientMessageEvent::new(
                32,
                self.window,
                self.atoms.wm_protocols,
                [self.atoms.stop, 0, 0, 0, 0],
            );
            let sent = self
                .conn
                .send_event(false, self.window, EventMask::NO_EVENT, event)
                .and_then(|_| self.conn.flush());
            match sent {
                Ok(()) => {
                    if handle.join().is_err() {
                        error!("输入监听线程异常退出");
                    }
                }
                Err(e) => warn!("无法通知输入监听线程: {}", e),
            }
        }
        let _ = self.conn.free_gc(self.gc);
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
        debug!("X11 窗口已销毁");
    }
}

fn listen(
    conn: Arc<RustConnection>,
    window: Window,
    atoms: Atoms,
    tx: Sender<ControlEvent>,
    seek_step: f64,
) {
    let mut last_click: Option<u32> = None;
    loop {
        let event = match conn.wait_for_event() {
            Ok(event) => event,
            Err(e) => {
                warn!("X11 连接中断: {}", e);
                break;
            }
        };

        let control = match event {
            Event::KeyPress(key) => ControlEvent::from_key(key_from_keycode(key.detail), seek_step),
            Event::ButtonPress(button) => {
                let double = last_click
                    .map_or(false, |t| button.time.wrapping_sub(t) < DOUBLE_CLICK_MS);
                last_click = if double { None } else { Some(button.time) };
                double.then_some(ControlEvent::ToggleFullscreen)
            }
            Event::Expose(expose) if expose.count == 0 => Some(ControlEvent::Expose),
            Event::ConfigureNotify(configure) if configure.window == window => {
                Some(ControlEvent::Resize {
                    width: configure.width as u32,
                    height: configure.height as u32,
                })
            }
            Event::VisibilityNotify(visibility) => Some(ControlEvent::Visibility(
                visibility.state != Visibility::FULLY_OBSCURED,
            )),
            Event::ClientMessage(message) if message.type_ == atoms.wm_protocols => {
                let data = message.data.as_data32();
                if data[0] == atoms.stop {
                    debug!("输入监听线程退出");
                    break;
                }
                (data[0] == atoms.wm_delete_window).then_some(ControlEvent::Quit)
            }
            _ => None,
        };

        if let Some(control) = control {
            if tx.send(control).is_err() {
                break;
            }
        }
    }
}

/// XVideo 能力探测
pub struct XvProbe {
    conn: Arc<RustConnection>,
    window: Window,
}

impl OverlayProbe for XvProbe {
    fn extension_present(&mut self) -> bool {
        matches!(
            self.conn.extension_information(xv::X11_EXTENSION_NAME),
            Ok(Some(_))
        )
    }

    fn adaptors(&mut self) -> Result<Vec<AdaptorInfo>> {
        let reply = self
            .conn
            .xv_query_adaptors(self.window)
            .map_err(display_err)?
            .reply()
            .map_err(display_err)?;
        let image = u8::from(xv::Type::IMAGE_MASK);
        let input = u8::from(xv::Type::INPUT_MASK);
        Ok(reply
            .info
            .iter()
            .map(|adaptor| {
                let bits = u8::from(adaptor.type_);
                AdaptorInfo {
                    name: String::from_utf8_lossy(&adaptor.name).into_owned(),
                    base_port: adaptor.base_id,
                    num_ports: adaptor.num_ports,
                    supports_image: bits & image != 0,
                    supports_input: bits & input != 0,
                }
            })
            .collect())
    }

    fn image_formats(&mut self, port: u32) -> Result<Vec<u32>> {
        let reply = self
            .conn
            .xv_list_image_formats(port)
            .map_err(display_err)?
            .reply()
            .map_err(display_err)?;
        Ok(reply.format.iter().map(|f| f.id).collect())
    }

    fn grab_port(&mut self, port: u32) -> Result<bool> {
        let reply = self
            .conn
            .xv_grab_port(port, x11rb::CURRENT_TIME)
            .map_err(display_err)?
            .reply()
            .map_err(display_err)?;
        Ok(reply.result == GrabPortStatus::SUCCESS)
    }
}

/// 呈现目标：XvShmPutImage / ShmPutImage
pub struct X11Target {
    conn: Arc<RustConnection>,
    root: Window,
    window: Window,
    gc: Gcontext,
    depth: u8,
    atoms: Atoms,
}

impl ShmTarget for X11Target {
    fn put_overlay(
        &mut self,
        port: u32,
        segment: u32,
        format: PixelFormat,
        image: (u32, u32),
        video: (u32, u32),
        output: (u32, u32),
    ) -> Result<()> {
        self.conn
            .xv_shm_put_image(
                port,
                self.window,
                self.gc,
                segment,
                format.fourcc(),
                0,
                0,
                0,
                video.0 as u16,
                video.1 as u16,
                0,
                0,
                output.0 as u16,
                output.1 as u16,
                image.0 as u16,
                image.1 as u16,
                0,
            )
            .map_err(display_err)?;
        self.conn.flush().map_err(display_err)
    }

    fn put_image(&mut self, segment: u32, video: (u32, u32)) -> Result<()> {
        let (w, h) = (video.0 as u16, video.1 as u16);
        self.conn
            .shm_put_image(
                self.window,
                self.gc,
                w,
                h,
                0,
                0,
                w,
                h,
                0,
                0,
                self.depth,
                ImageFormat::Z_PIXMAP.into(),
                false,
                segment,
                0,
            )
            .map_err(display_err)?;
        self.conn.flush().map_err(display_err)
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()> {
        // _NET_WM_STATE_REMOVE = 0, _NET_WM_STATE_ADD = 1
        let action = u32::from(fullscreen);
        let event = ClientMessageEvent::new(
            32,
            self.window,
            self.atoms.net_wm_state,
            [action, self.atoms.net_wm_state_fullscreen, 0, 1, 0],
        );
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )
            .map_err(display_err)?;
        self.conn.flush().map_err(display_err)?;
        info!("{}", if fullscreen { "⛶ 进入全屏" } else { "退出全屏" });
        Ok(())
    }

    fn release_port(&mut self, port: u32) -> Result<()> {
        self.conn
            .xv_ungrab_port(port, x11rb::CURRENT_TIME)
            .map_err(display_err)?;
        self.conn.flush().map_err(display_err)
    }
}

/// SysV 共享内存段
pub struct SysvRegion {
    id: i32,
    ptr: *mut u8,
    len: usize,
}

impl ShmRegion for SysvRegion {
    fn shm_id(&self) -> u32 {
        self.id as u32
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr 指向 shmat 映射的 len 字节，直到 free 时才 shmdt
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: 同上，且只有本进程的这一个写者
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// SysV shm + MIT-SHM 注册
pub struct SysvShm {
    conn: Arc<RustConnection>,
}

impl ShmBackend for SysvShm {
    fn allocate(&mut self, size: usize) -> Result<Box<dyn ShmRegion>> {
        // SAFETY: 纯 FFI 调用，返回值都做了检查
        unsafe {
            let id = libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600);
            if id < 0 {
                return Err(PlayerError::SharedMemoryError(format!(
                    "shmget 失败: {}",
                    std::io::Error::last_os_error()
                )));
            }
            let ptr = libc::shmat(id, std::ptr::null(), 0);
            if ptr as isize == -1 {
                let err = std::io::Error::last_os_error();
                libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut());
                return Err(PlayerError::SharedMemoryError(format!("shmat 失败: {}", err)));
            }
            Ok(Box::new(SysvRegion {
                id,
                ptr: ptr as *mut u8,
                len: size,
            }))
        }
    }

    fn attach(&mut self, region: &dyn ShmRegion) -> Result<u32> {
        let segment = self.conn.generate_id().map_err(display_err)?;
        self.conn
            .shm_attach(segment, region.shm_id(), false)
            .map_err(display_err)?
            .check()
            .map_err(|e| PlayerError::SharedMemoryError(format!("MIT-SHM attach 失败: {}", e)))?;
        Ok(segment)
    }

    fn detach(&mut self, segment: u32) -> Result<()> {
        self.conn
            .shm_detach(segment)
            .map_err(display_err)?
            .check()
            .map_err(|e| PlayerError::SharedMemoryError(format!("MIT-SHM detach 失败: {}", e)))
    }

    fn free(&mut self, region: Box<dyn ShmRegion>) -> Result<()> {
        let id = region.shm_id() as i32;
        let ptr = region.as_slice().as_ptr();
        // SAFETY: ptr 来自 allocate 里的 shmat，region 在这里被消费，之后不再访问
        unsafe {
            let detached = libc::shmdt(ptr as *const libc::c_void);
            let removed = libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut());
            if detached != 0 || removed != 0 {
                return Err(PlayerError::SharedMemoryError(format!(
                    "释放共享内存段 {} 失败: {}",
                    id,
                    std::io::Error::last_os_error()
                )));
            }
        }
        drop(region);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keycode_mapping() {
        assert_eq!(key_from_keycode(24), Key::Q);
        assert_eq!(key_from_keycode(9), Key::Escape);
        assert_eq!(key_from_keycode(65), Key::Space);
        assert_eq!(key_from_keycode(33), Key::P);
        assert_eq!(key_from_keycode(41), Key::F);
        assert_eq!(key_from_keycode(95), Key::F11);
        assert_eq!(key_from_keycode(113), Key::Left);
        assert_eq!(key_from_keycode(114), Key::Right);
        assert_eq!(key_from_keycode(38), Key::Other);
    }
}
