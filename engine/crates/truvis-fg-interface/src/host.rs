//! 基于主机内存的协作者实现
//!
//! 所有"设备内存"都是主机上的字节数组，vk handle 是递增的假值。
//! 不需要 GPU 就可以驱动同步和数据暂存核心，单元测试全部基于它运行。

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use slotmap::SlotMap;

use crate::desc::{
    BufferDesc, BufferResource, EMemoryType, ImageDesc, ImageResource, ImageViewDesc, MappedMemoryRange, MemoryInfo,
    RenderPassDesc, SubmitRenderPass,
};
use crate::error::{FgError, FgResult};
use crate::frame_graph::{FrameGraphThread, ResourceManager, TaskScheduler};
use crate::handles::{BufferHandle, ImageHandle, MemoryHandle, RenderPassHandle, TaskHandle};

/// 一块主机内存
///
/// 映射指针在整个生命周期内保持稳定，直到被释放。
struct HostMemory {
    ptr: NonNull<[u8]>,
    memory: vk::DeviceMemory,
    /// buffer 在内存块中的偏移
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    flags: vk::MemoryPropertyFlags,
}
impl HostMemory {
    fn new(memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize, flags: vk::MemoryPropertyFlags) -> Self {
        let bytes = vec![0u8; (offset + size) as usize].into_boxed_slice();
        Self {
            ptr: NonNull::from(Box::leak(bytes)),
            memory,
            offset,
            size,
            flags,
        }
    }

    #[inline]
    fn is_host_visible(&self) -> bool {
        self.flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// buffer 所占的字节
    fn bytes(&self) -> &[u8] {
        // SAFETY: ptr 来自 Box::leak，在 drop 之前一直有效
        let all = unsafe { self.ptr.as_ref() };
        &all[self.offset as usize..]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，&mut self 保证独占
        let all = unsafe { self.ptr.as_mut() };
        &mut all[self.offset as usize..]
    }

    fn info(&self) -> MemoryInfo {
        let mapped_ptr = if self.is_host_visible() {
            // SAFETY: offset 位于分配范围内
            NonNull::new(unsafe { self.ptr.cast::<u8>().as_ptr().add(self.offset as usize) })
        } else {
            None
        };
        MemoryInfo {
            memory: self.memory,
            offset: self.offset,
            size: self.size,
            mapped_ptr,
            flags: self.flags,
        }
    }
}
impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: ptr 来自 Box::leak，且只会被释放一次
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
    }
}

/// 记录在 RenderPass 中的绘制任务
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDrawTask {
    pub name: String,
}
impl HostDrawTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// 独立任务
#[derive(Clone, Debug, Default)]
pub struct HostTask {
    pub name: String,
    pub depends_on: Vec<TaskHandle>,
}
impl HostTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
        }
    }

    /// builder
    pub fn depends_on(mut self, task: TaskHandle) -> Self {
        self.depends_on.push(task);
        self
    }
}

struct HostRenderPass {
    desc: RenderPassDesc,
    draw_tasks: Vec<HostDrawTask>,
}

struct TaskNode {
    handle: TaskHandle,
    name: String,
    pass: Option<RenderPassHandle>,
}

/// 主机内存上的 FrameGraph 线程
pub struct HostFrameGraph {
    ring_buffer_size: usize,
    coherent: bool,
    fail_allocations: bool,
    next_raw_handle: u64,

    memories: SlotMap<MemoryHandle, HostMemory>,
    buffers: SlotMap<BufferHandle, Arc<BufferResource>>,
    images: SlotMap<ImageHandle, Arc<ImageResource>>,
    views: HashMap<vk::ImageView, ImageHandle>,

    render_passes: SlotMap<RenderPassHandle, HostRenderPass>,
    tasks: SlotMap<TaskHandle, NodeIndex>,
    task_graph: DiGraph<TaskNode, ()>,

    flushed: Vec<Vec<MappedMemoryRange>>,
    invalidated: Vec<Vec<MappedMemoryRange>>,
}
// new & init
impl HostFrameGraph {
    /// buffer 在内存块中的偏移，用于模拟子分配
    pub const BUFFER_MEMORY_OFFSET: vk::DeviceSize = 256;

    pub fn new(ring_buffer_size: usize) -> Self {
        Self {
            ring_buffer_size,
            coherent: false,
            fail_allocations: false,
            next_raw_handle: 1,

            memories: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            views: HashMap::new(),

            render_passes: SlotMap::with_key(),
            tasks: SlotMap::with_key(),
            task_graph: DiGraph::new(),

            flushed: Vec::new(),
            invalidated: Vec::new(),
        }
    }

    /// builder
    ///
    /// host visible 内存是否带有 HOST_COHERENT 标志，默认为 false
    pub fn coherent(mut self, coherent: bool) -> Self {
        self.coherent = coherent;
        self
    }

    /// 之后的资源创建全部失败，用于模拟内存耗尽
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }
}
// getter
impl HostFrameGraph {
    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn live_view_count(&self) -> usize {
        self.views.len()
    }

    /// 每次 flush 调用传入的 range
    #[inline]
    pub fn flushed_ranges(&self) -> &[Vec<MappedMemoryRange>] {
        &self.flushed
    }

    /// 每次 invalidate 调用传入的 range
    #[inline]
    pub fn invalidated_ranges(&self) -> &[Vec<MappedMemoryRange>] {
        &self.invalidated
    }

    pub fn draw_tasks(&self, pass: RenderPassHandle) -> &[HostDrawTask] {
        self.render_passes.get(pass).map(|p| p.draw_tasks.as_slice()).unwrap_or(&[])
    }

    pub fn render_pass_desc(&self, pass: RenderPassHandle) -> Option<&RenderPassDesc> {
        self.render_passes.get(pass).map(|p| &p.desc)
    }

    pub fn task_name(&self, task: TaskHandle) -> Option<&str> {
        self.tasks.get(task).map(|&node| self.task_graph[node].name.as_str())
    }

    pub fn task_pass(&self, task: TaskHandle) -> Option<RenderPassHandle> {
        self.tasks.get(task).and_then(|&node| self.task_graph[node].pass)
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
// tools
impl HostFrameGraph {
    fn next_raw(&mut self) -> u64 {
        let raw = self.next_raw_handle;
        self.next_raw_handle += 1;
        raw
    }

    fn memory_flags(&self, mem_type: EMemoryType) -> vk::MemoryPropertyFlags {
        let mut flags = match mem_type {
            EMemoryType::Default => return vk::MemoryPropertyFlags::DEVICE_LOCAL,
            EMemoryType::HostWrite => vk::MemoryPropertyFlags::HOST_VISIBLE,
            EMemoryType::HostRead => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        };
        if self.coherent {
            flags |= vk::MemoryPropertyFlags::HOST_COHERENT;
        }
        flags
    }

    fn buffer_memory_mut(&mut self, buffer: BufferHandle) -> FgResult<&mut HostMemory> {
        let memory = self.buffers.get(buffer).ok_or(FgError::BufferNotFound(buffer))?.memory;
        self.memories.get_mut(memory).ok_or(FgError::MemoryNotFound(memory))
    }

    /// 模拟设备向 buffer 写入数据，例如一次 device -> host 的拷贝
    pub fn write_buffer(&mut self, buffer: BufferHandle, offset: vk::DeviceSize, data: &[u8]) -> FgResult<()> {
        let memory = self.buffer_memory_mut(buffer)?;
        let begin = offset as usize;
        memory.bytes_mut()[begin..begin + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// 模拟设备读取 buffer 的数据，例如一次 host -> device 的拷贝
    pub fn read_buffer(&mut self, buffer: BufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize) -> FgResult<Vec<u8>> {
        let memory = self.buffer_memory_mut(buffer)?;
        let begin = offset as usize;
        Ok(memory.bytes()[begin..begin + size as usize].to_vec())
    }

    /// `task` 是否（传递地）依赖 `dep`
    pub fn depends_on(&self, task: TaskHandle, dep: TaskHandle) -> bool {
        match (self.tasks.get(task), self.tasks.get(dep)) {
            (Some(&task), Some(&dep)) => task != dep && has_path_connecting(&self.task_graph, dep, task, None),
            _ => false,
        }
    }

    pub fn direct_dependencies(&self, task: TaskHandle) -> Vec<TaskHandle> {
        let Some(&node) = self.tasks.get(task) else {
            return Vec::new();
        };
        let mut deps: Vec<_> = self
            .task_graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|dep| self.task_graph[dep].handle)
            .collect();
        deps.reverse();
        deps
    }

    /// 按照依赖关系排序后的任务名
    pub fn execution_order(&self) -> Vec<&str> {
        match toposort(&self.task_graph, None) {
            Ok(nodes) => nodes.into_iter().map(|node| self.task_graph[node].name.as_str()).collect(),
            Err(cycle) => {
                log::error!("task graph has a cycle at {:?}", self.task_graph[cycle.node_id()].name);
                Vec::new()
            }
        }
    }

    fn insert_task(&mut self, name: String, pass: Option<RenderPassHandle>, depends_on: &[TaskHandle]) -> TaskHandle {
        let handle = self.tasks.insert_with_key(|handle| self.task_graph.add_node(TaskNode { handle, name, pass }));
        let node = self.tasks[handle];
        for dep in depends_on {
            match self.tasks.get(*dep) {
                Some(&dep_node) => {
                    self.task_graph.update_edge(dep_node, node, ());
                }
                None => log::warn!("task depends on unknown task {:?}", dep),
            }
        }
        handle
    }
}
impl ResourceManager for HostFrameGraph {
    fn buffer_resource(&self, handle: BufferHandle) -> Option<Arc<BufferResource>> {
        self.buffers.get(handle).cloned()
    }

    fn image_resource(&self, handle: ImageHandle) -> Option<Arc<ImageResource>> {
        self.images.get(handle).cloned()
    }

    fn memory_info(&self, handle: MemoryHandle) -> FgResult<MemoryInfo> {
        self.memories.get(handle).map(HostMemory::info).ok_or(FgError::MemoryNotFound(handle))
    }
}
impl FrameGraphThread for HostFrameGraph {
    #[inline]
    fn ring_buffer_size(&self) -> usize {
        self.ring_buffer_size
    }

    fn create_buffer(&mut self, mem_type: EMemoryType, desc: &BufferDesc, name: &str) -> FgResult<BufferHandle> {
        if self.fail_allocations {
            log::warn!("failed to create buffer {}", name);
            return Err(FgError::AllocationFailed {
                kind: "buffer",
                size: desc.size,
            });
        }

        let raw_memory = self.next_raw();
        let flags = self.memory_flags(mem_type);
        let memory = self.memories.insert(HostMemory::new(
            vk::DeviceMemory::from_raw(raw_memory),
            Self::BUFFER_MEMORY_OFFSET,
            desc.size,
            flags,
        ));

        let buffer = vk::Buffer::from_raw(self.next_raw());
        let handle = self.buffers.insert_with_key(|handle| {
            Arc::new(BufferResource {
                handle,
                buffer,
                desc: *desc,
                memory,
                name: name.to_string(),
            })
        });
        log::trace!("create buffer {}: {:?}, size {}", name, handle, desc.size);
        Ok(handle)
    }

    fn create_image(&mut self, _mem_type: EMemoryType, desc: &ImageDesc, name: &str) -> FgResult<ImageHandle> {
        if self.fail_allocations {
            log::warn!("failed to create image {}", name);
            return Err(FgError::AllocationFailed {
                kind: "image",
                size: desc.extent.width as u64 * desc.extent.height as u64 * desc.extent.depth as u64,
            });
        }

        let image = vk::Image::from_raw(self.next_raw());
        let handle = self.images.insert_with_key(|handle| {
            Arc::new(ImageResource {
                handle,
                image,
                desc: *desc,
                name: name.to_string(),
            })
        });
        log::trace!("create image {}: {:?}", name, handle);
        Ok(handle)
    }

    fn create_image_view(&mut self, image: ImageHandle, _desc: &ImageViewDesc) -> FgResult<vk::ImageView> {
        if !self.images.contains_key(image) {
            return Err(FgError::ImageNotFound(image));
        }
        let view = vk::ImageView::from_raw(self.next_raw());
        self.views.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if self.views.remove(&view).is_none() {
            log::warn!("destroy unknown image view {:?}", view);
        }
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        match self.buffers.remove(handle) {
            Some(buffer) => {
                self.memories.remove(buffer.memory);
                log::trace!("destroy buffer {}: {:?}", buffer.name, handle);
            }
            None => log::warn!("destroy unknown buffer {:?}", handle),
        }
    }

    fn destroy_image(&mut self, handle: ImageHandle) {
        if self.images.remove(handle).is_none() {
            log::warn!("destroy unknown image {:?}", handle);
        }
    }

    fn flush_mapped_memory_ranges(&mut self, ranges: &[MappedMemoryRange]) -> FgResult<()> {
        self.flushed.push(ranges.to_vec());
        Ok(())
    }

    fn invalidate_mapped_memory_ranges(&mut self, ranges: &[MappedMemoryRange]) -> FgResult<()> {
        self.invalidated.push(ranges.to_vec());
        Ok(())
    }
}
impl TaskScheduler for HostFrameGraph {
    type DrawTask = HostDrawTask;
    type Task = HostTask;

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> FgResult<RenderPassHandle> {
        if self.fail_allocations {
            return Err(FgError::AllocationFailed {
                kind: "render pass",
                size: 0,
            });
        }
        Ok(self.render_passes.insert(HostRenderPass {
            desc: desc.clone(),
            draw_tasks: Vec::new(),
        }))
    }

    fn add_draw_task(&mut self, pass: RenderPassHandle, task: HostDrawTask) {
        match self.render_passes.get_mut(pass) {
            Some(render_pass) => render_pass.draw_tasks.push(task),
            None => log::error!("draw task {} targets unknown render pass {:?}", task.name, pass),
        }
    }

    fn add_task(&mut self, task: HostTask) -> TaskHandle {
        self.insert_task(task.name, None, &task.depends_on)
    }

    fn submit_render_pass(&mut self, submit: SubmitRenderPass) -> TaskHandle {
        self.insert_task(submit.name, submit.pass, &submit.depends_on)
    }
}
