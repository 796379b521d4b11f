//! 资源状态跟踪与 barrier 计算
//!
//! 每个录制上下文为它使用到的资源持有一个 [`LocalImage`] / [`LocalBuffer`]，
//! 任务执行前通过 `add_pending_state` 声明自己的使用方式，再通过 `commit_barrier`
//! 把需要的状态转换交给 [`BarrierManager`]，由它统一发出一次 `vkCmdPipelineBarrier2`。

pub mod barrier;
pub mod barrier_manager;
pub mod image_range;
pub mod local_buffer;
pub mod local_image;
pub mod local_resource;
pub mod sub_range;

pub use barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier};
pub use barrier_manager::BarrierManager;
pub use image_range::ImageRange;
pub use local_buffer::{BufferState, LocalBuffer};
pub use local_image::{ImageState, LocalImage};
pub use local_resource::{LocalResourceStateTracker, ResourceBarrier, ResourceTransition};
pub use sub_range::SubRange;
