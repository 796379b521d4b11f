//! FrameGraph 的 GPU 边界
//!
//! 同步与数据暂存核心（`truvis-framegraph`）只通过这里定义的类型和 trait 与外部协作：
//!
//! - [`handles`]: 轻量级资源句柄
//! - [`desc`]: 资源描述与内存信息，创建后只读，可跨线程共享
//! - [`resource_state`]: pipeline stage + access 的组合状态
//! - [`frame_graph`]: 资源管理器、FrameGraph 线程、任务调度器三个协作者接口
//! - `host`: 基于主机内存的协作者实现，无需 GPU 即可驱动整个核心（`host` feature）
//! - [`config`] / [`error`]: 配置与可恢复错误

pub mod config;
pub mod desc;
pub mod error;
pub mod exe_order;
pub mod frame_counter;
pub mod frame_graph;
pub mod handles;
#[cfg(any(test, feature = "host"))]
pub mod host;
pub mod resource_state;
