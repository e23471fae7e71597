// 显示后端：X11（XVideo 覆盖层 / MIT-SHM 软件转换）与 SDL（原生 YUV 纹理）

#[cfg(feature = "sdl")]
pub mod sdl;
#[cfg(feature = "x11")]
pub mod x11;
