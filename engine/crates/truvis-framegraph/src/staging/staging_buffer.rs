use std::ptr::NonNull;

use ash::vk;
use truvis_fg_interface::desc::MappedMemoryRange;
use truvis_fg_interface::error::{FgError, FgResult};
use truvis_fg_interface::frame_graph::ResourceManager;
use truvis_fg_interface::handles::{BufferHandle, MemoryHandle};

/// staging buffer 中的一段区域，调用方据此发出拷贝命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingRegion {
    pub buffer: BufferHandle,
    pub vk_buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// 固定容量的 host visible buffer，按游标顺序分配
///
/// - `offset`: 本次使用（sub phase）开始时的游标，之前的数据属于同一帧更早的使用
/// - `size`: 已经使用的字节数
pub struct StagingBuffer {
    buffer: BufferHandle,
    vk_buffer: vk::Buffer,
    memory_handle: MemoryHandle,
    capacity: vk::DeviceSize,

    offset: vk::DeviceSize,
    size: vk::DeviceSize,

    mapped_ptr: Option<NonNull<u8>>,
    memory: vk::DeviceMemory,
    /// buffer 在整块内存中的偏移
    mem_offset: vk::DeviceSize,
    is_coherent: bool,
}
// new & init
impl StagingBuffer {
    pub fn new(
        buffer: BufferHandle,
        vk_buffer: vk::Buffer,
        memory_handle: MemoryHandle,
        capacity: vk::DeviceSize,
    ) -> Self {
        Self {
            buffer,
            vk_buffer,
            memory_handle,
            capacity,
            offset: 0,
            size: 0,
            mapped_ptr: None,
            memory: vk::DeviceMemory::null(),
            mem_offset: 0,
            is_coherent: false,
        }
    }

    /// 重新查询映射信息
    ///
    /// 内存可能在碎片整理时被重新分配，每帧第一次使用前都需要调用。
    pub fn map_memory(&mut self, resource_mgr: &impl ResourceManager) -> FgResult<()> {
        let info = resource_mgr.memory_info(self.memory_handle)?;
        self.mapped_ptr = Some(info.mapped_ptr.ok_or(FgError::MemoryNotMapped(self.memory_handle))?);
        self.memory = info.memory;
        self.mem_offset = info.offset;
        self.is_coherent = info.is_coherent();
        Ok(())
    }
}
// getter
impl StagingBuffer {
    #[inline]
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.vk_buffer
    }

    #[inline]
    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }

    #[inline]
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn available(&self) -> vk::DeviceSize {
        self.capacity - self.size
    }

    /// 本次使用没有新的数据
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == self.offset
    }

    #[inline]
    pub fn is_coherent(&self) -> bool {
        self.is_coherent
    }

    /// 本次使用写入的数据对应的内存范围，用于 flush / invalidate
    #[inline]
    pub fn dirty_range(&self) -> MappedMemoryRange {
        MappedMemoryRange {
            memory: self.memory,
            offset: self.mem_offset + self.offset,
            size: self.size - self.offset,
        }
    }
}
// tools
impl StagingBuffer {
    /// 游标回到起点
    #[inline]
    pub fn recycle(&mut self) {
        self.offset = 0;
        self.size = 0;
    }

    /// 从当前位置继续追加，不覆盖同一帧更早写入的数据
    #[inline]
    pub fn continue_usage(&mut self) {
        self.offset = self.size;
    }

    /// 预留 `size` 字节，返回起始位置
    #[inline]
    pub fn reserve(&mut self, size: vk::DeviceSize) -> vk::DeviceSize {
        debug_assert!(size <= self.available());
        let offset = self.size;
        self.size += size;
        offset
    }

    #[inline]
    pub fn region(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> StagingRegion {
        StagingRegion {
            buffer: self.buffer,
            vk_buffer: self.vk_buffer,
            offset,
            size,
        }
    }

    /// 把 `data` 写入映射内存的 `offset` 处
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> FgResult<()> {
        let ptr = self.mapped_ptr.ok_or(FgError::MemoryNotMapped(self.memory_handle))?;
        assert!(offset + data.len() as u64 <= self.capacity, "write out of staging buffer");
        // SAFETY: 映射内存至少有 capacity 字节，并且只被当前录制上下文写入
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        Ok(())
    }

    /// 映射内存中的一段数据
    pub fn mapped_slice(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Option<&[u8]> {
        let ptr = self.mapped_ptr?;
        if offset + size > self.capacity {
            return None;
        }
        // SAFETY: 范围已检查；GPU 对该区域的写入在 invalidate 之前已经完成
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr().add(offset as usize), size as usize) })
    }
}
