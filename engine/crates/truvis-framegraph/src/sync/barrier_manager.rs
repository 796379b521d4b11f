use ash::vk;
use itertools::Itertools;

use crate::sync::barrier::{GfxBufferBarrier, GfxImageBarrier};

/// 收集一个批次内的所有 barrier，一次性发出
///
/// 多个录制上下文各自持有自己的 `BarrierManager`，需要合并时通过 [`BarrierManager::append`]
/// 串行地汇总到一起。同一资源上 barrier 的先后由执行序号决定，与这里的顺序无关。
#[derive(Default)]
pub struct BarrierManager {
    image_barriers: Vec<GfxImageBarrier>,
    buffer_barriers: Vec<GfxBufferBarrier>,
}
// new & init
impl BarrierManager {
    pub fn new() -> Self {
        Self::default()
    }
}
// getter
impl BarrierManager {
    #[inline]
    pub fn image_barriers(&self) -> &[GfxImageBarrier] {
        &self.image_barriers
    }

    #[inline]
    pub fn buffer_barriers(&self) -> &[GfxBufferBarrier] {
        &self.buffer_barriers
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }
}
// tools
impl BarrierManager {
    #[inline]
    pub fn add_image_barrier(&mut self, barrier: GfxImageBarrier) {
        self.image_barriers.push(barrier);
    }

    #[inline]
    pub fn add_buffer_barrier(&mut self, barrier: GfxBufferBarrier) {
        self.buffer_barriers.push(barrier);
    }

    /// 把另一个批次的 barrier 移动到当前批次
    pub fn append(&mut self, other: &mut BarrierManager) {
        self.image_barriers.append(&mut other.image_barriers);
        self.buffer_barriers.append(&mut other.buffer_barriers);
    }

    pub fn clear(&mut self) {
        self.image_barriers.clear();
        self.buffer_barriers.clear();
    }

    /// 把当前批次记录到 command buffer 中并清空
    ///
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    pub fn record(&mut self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        let image_barriers = self.image_barriers.iter().map(|b| *b.inner()).collect_vec();
        let buffer_barriers = self.buffer_barriers.iter().map(|b| *b.inner()).collect_vec();
        log::trace!(
            "record {} image barriers, {} buffer barriers",
            image_barriers.len(),
            buffer_barriers.len()
        );

        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe {
            device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
        }
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append() {
        let mut main = BarrierManager::new();
        let mut worker = BarrierManager::new();

        main.add_image_barrier(GfxImageBarrier::new());
        worker.add_buffer_barrier(GfxBufferBarrier::new().buffer(vk::Buffer::null(), 0, 16));
        worker.add_image_barrier(GfxImageBarrier::new());

        main.append(&mut worker);
        assert!(worker.is_empty());
        assert_eq!(main.image_barriers().len(), 2);
        assert_eq!(main.buffer_barriers()[0].inner().size, 16);

        main.clear();
        assert!(main.is_empty());
    }
}
