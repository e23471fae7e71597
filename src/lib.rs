//! MPEG 播放器的同步与呈现管线
//!
//! 墙钟节拍器驱动外部解码引擎，把解码出来的帧交给启动时选定的呈现策略
//! （硬件覆盖层 / 软件转换 / 原生纹理），把样本交给音频输出。

pub mod core;
pub mod player;
pub mod renderer;
#[cfg(any(feature = "x11", feature = "sdl"))]
pub mod platform;

pub use crate::core::{PlayerConfig, PlayerError, Result};
pub use crate::player::{run, PlaybackStats, Session, SessionBuilder};
