// 呈现层：策略选择、共享帧缓冲与三种输出方式

pub mod convert;
pub mod frame_buffer;
pub mod layout;
pub mod negotiate;
pub mod overlay;
pub mod strategy;
pub mod texture;

pub use convert::SoftwareConvert;
pub use frame_buffer::{BufferState, SharedFrameBuffer, ShmBackend, ShmRegion};
pub use layout::PlaneLayout;
pub use negotiate::{negotiate, AdaptorInfo, FallbackReason, OverlayChoice, OverlayProbe};
pub use overlay::HardwareOverlay;
pub use strategy::{
    plan_shm_strategy, PresentStats, PresentationStrategy, ShmTarget, StrategyKind, StrategyPlan,
};
pub use texture::{NativeTexture, YuvTarget};
