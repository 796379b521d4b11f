//! 协作者接口
//!
//! 核心只通过这三个 trait 访问外部：
//!
//! - [`ResourceManager`]: 只读查询资源元数据和内存映射信息
//! - [`FrameGraphThread`]: 当前录制上下文，负责创建/销毁资源、flush/invalidate 映射内存
//! - [`TaskScheduler`]: 任务图，负责 RenderPass 和任务之间的依赖

use std::sync::Arc;

use ash::vk;

use crate::desc::{
    BufferDesc, BufferResource, EMemoryType, ImageDesc, ImageResource, ImageViewDesc, MappedMemoryRange, MemoryInfo,
    RenderPassDesc, SubmitRenderPass,
};
use crate::error::FgResult;
use crate::handles::{BufferHandle, ImageHandle, MemoryHandle, RenderPassHandle, TaskHandle};

/// 全局资源管理器的只读视图
///
/// 资源元数据创建后不可变，可以在任意线程并发读取。
pub trait ResourceManager {
    fn buffer_resource(&self, handle: BufferHandle) -> Option<Arc<BufferResource>>;

    fn image_resource(&self, handle: ImageHandle) -> Option<Arc<ImageResource>>;

    /// 内存可能在碎片整理时被重新分配，调用方不应长期缓存返回值
    fn memory_info(&self, handle: MemoryHandle) -> FgResult<MemoryInfo>;
}

/// 单个 FrameGraph 录制线程的上下文
pub trait FrameGraphThread: ResourceManager {
    /// 同时在飞行中的帧数
    fn ring_buffer_size(&self) -> usize;

    fn create_buffer(&mut self, mem_type: EMemoryType, desc: &BufferDesc, name: &str) -> FgResult<BufferHandle>;

    fn create_image(&mut self, mem_type: EMemoryType, desc: &ImageDesc, name: &str) -> FgResult<ImageHandle>;

    fn create_image_view(&mut self, image: ImageHandle, desc: &ImageViewDesc) -> FgResult<vk::ImageView>;

    fn destroy_image_view(&mut self, view: vk::ImageView);

    fn destroy_buffer(&mut self, handle: BufferHandle);

    fn destroy_image(&mut self, handle: ImageHandle);

    /// host -> device 同步，一次调用覆盖所有 range
    fn flush_mapped_memory_ranges(&mut self, ranges: &[MappedMemoryRange]) -> FgResult<()>;

    /// device -> host 同步，一次调用覆盖所有 range
    fn invalidate_mapped_memory_ranges(&mut self, ranges: &[MappedMemoryRange]) -> FgResult<()>;
}

/// 任务调度器
///
/// 核心只是调度器的客户端：它决定任务之间的依赖，任务的执行由调度器负责。
pub trait TaskScheduler {
    /// 在 RenderPass 内部执行的绘制任务
    type DrawTask;
    /// 任意的独立任务
    type Task;

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> FgResult<RenderPassHandle>;

    fn add_draw_task(&mut self, pass: RenderPassHandle, task: Self::DrawTask);

    fn add_task(&mut self, task: Self::Task) -> TaskHandle;

    fn submit_render_pass(&mut self, submit: SubmitRenderPass) -> TaskHandle;
}
