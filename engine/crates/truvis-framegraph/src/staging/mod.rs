//! host 与 device 之间的数据暂存
//!
//! 每个 ring slot 有两组 staging buffer：host -> device 用于上传，device -> host 用于回读。
//! 回读的数据在同一个 ring slot 下一次被使用时才对 CPU 可见，届时触发注册的回调。

pub mod events;
pub mod staging_buffer;
pub mod staging_pool;

pub use events::{BufferView, ImageView, LoadRange, OnBufferDataLoadedEvent, OnImageDataLoadedEvent};
pub use staging_buffer::{StagingBuffer, StagingRegion};
pub use staging_pool::StagingBufferPool;
