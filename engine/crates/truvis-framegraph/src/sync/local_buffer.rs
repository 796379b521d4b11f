use std::sync::Arc;

use ash::vk;
use truvis_fg_interface::desc::BufferResource;
use truvis_fg_interface::exe_order::ExeOrderIndex;
use truvis_fg_interface::handles::BufferHandle;
use truvis_fg_interface::resource_state::ResourceState;

use crate::sync::barrier::{GfxBarrierMask, GfxBufferBarrier};
use crate::sync::barrier_manager::BarrierManager;
use crate::sync::local_resource::{LocalResourceStateTracker, ResourceBarrier};
use crate::sync::sub_range::SubRange;

/// 任务对 buffer 某段字节的使用声明
#[derive(Clone, Copy, Debug)]
pub struct BufferState {
    pub state: ResourceState,
    pub offset: vk::DeviceSize,
    /// `vk::WHOLE_SIZE` 表示到 buffer 末尾
    pub size: vk::DeviceSize,
    pub index: ExeOrderIndex,
}
impl BufferState {
    pub fn new(state: ResourceState, offset: vk::DeviceSize, size: vk::DeviceSize, index: ExeOrderIndex) -> Self {
        Self {
            state,
            offset,
            size,
            index,
        }
    }

    pub fn whole(state: ResourceState, index: ExeOrderIndex) -> Self {
        Self::new(state, 0, vk::WHOLE_SIZE, index)
    }
}

/// buffer 在录制线程中的本地镜像
pub struct LocalBuffer {
    buffer: Arc<BufferResource>,
    tracker: LocalResourceStateTracker,
}
// new & init
impl LocalBuffer {
    pub fn new(buffer: Arc<BufferResource>) -> Self {
        let tracker = LocalResourceStateTracker::new(SubRange::new(0, buffer.desc.size), vk::ImageLayout::UNDEFINED);
        Self { buffer, tracker }
    }
}
// getter
impl LocalBuffer {
    #[inline]
    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.desc.size
    }

    #[inline]
    pub fn read_write_barriers(&self) -> &[ResourceBarrier] {
        self.tracker.read_write_barriers()
    }

    #[inline]
    pub fn pending_barriers(&self) -> &[ResourceBarrier] {
        self.tracker.pending_barriers()
    }
}
// tools
impl LocalBuffer {
    pub fn add_pending_state(&mut self, state: &BufferState) {
        let size = if state.size == vk::WHOLE_SIZE {
            self.size().saturating_sub(state.offset)
        } else {
            state.size
        };
        let range = SubRange::from_offset_size(state.offset, size);
        if range.is_empty() {
            log::trace!("skip empty buffer state on {}", self.buffer.name);
            return;
        }
        debug_assert!(
            range.end <= self.size(),
            "buffer range {} out of buffer {} (size {})",
            range,
            self.buffer.name,
            self.size()
        );

        self.tracker.add_pending_state(range, vk::ImageLayout::UNDEFINED, state.state, state.index);
    }

    pub fn commit_barrier(&mut self, barrier_mgr: &mut BarrierManager) {
        for transition in self.tracker.commit() {
            barrier_mgr.add_buffer_barrier(
                GfxBufferBarrier::new()
                    .buffer(self.buffer.buffer, transition.range.begin, transition.range.len())
                    .mask(GfxBarrierMask::new(transition.src, transition.dst)),
            );
        }
    }

    /// 丢弃所有状态
    pub fn reset(&mut self) {
        self.tracker.reset();
    }
}
