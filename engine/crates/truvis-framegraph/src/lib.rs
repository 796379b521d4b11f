//! FrameGraph 的同步与数据暂存核心
//!
//! - [`sync`]: 跟踪每个资源（按子资源范围）的状态，在任务执行前计算最少的 barrier
//! - [`staging`]: 基于 ring buffer 的 staging buffer 池，负责 host 与 device 之间的数据搬运
//!
//! 两者都只在单个录制上下文中使用，不做内部加锁。

pub mod staging;
pub mod sync;
