use ash::vk;
use truvis_fg_interface::config::FrameGraphConfig;
use truvis_fg_interface::desc::{BufferDesc, EMemoryType, MappedMemoryRange};
use truvis_fg_interface::error::{FgError, FgResult};
use truvis_fg_interface::frame_graph::FrameGraphThread;

use crate::staging::events::{
    BufferView, ImageView, LoadRange, OnBufferDataLoadedEvent, OnImageDataLoadedEvent,
};
use crate::staging::staging_buffer::{StagingBuffer, StagingRegion};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EStagingDirection {
    HostToDevice,
    DeviceToHost,
}
impl EStagingDirection {
    fn memory_type(self) -> EMemoryType {
        match self {
            Self::HostToDevice => EMemoryType::HostWrite,
            Self::DeviceToHost => EMemoryType::HostRead,
        }
    }

    fn debug_name(self) -> &'static str {
        match self {
            Self::HostToDevice => "StagingWriteBuffer",
            Self::DeviceToHost => "StagingReadBuffer",
        }
    }
}

/// 单个 ring slot 的 staging 资源
#[derive(Default)]
struct PerFrame {
    host_to_device: Vec<StagingBuffer>,
    device_to_host: Vec<StagingBuffer>,
    buffer_events: Vec<OnBufferDataLoadedEvent>,
    image_events: Vec<OnImageDataLoadedEvent>,
}

/// 按 ring slot 划分的 staging buffer 池
///
/// 每个 slot 的 buffer 在第一次需要时创建，只在 [`StagingBufferPool::deinitialize`] 时销毁。
/// 一个 slot 在 GPU 用完上一轮之前不能被复用，这由外部的 fence 保证。
///
/// 一帧内的使用顺序：
///
/// 1. [`on_begin_frame`](Self::on_begin_frame)：选择 slot。第一次使用时触发上一轮的回读事件并重置游标
/// 2. `store_*` / `add_pending_*`：分配 staging 区域
/// 3. [`on_end_frame`](Self::on_end_frame)：flush 非 coherent 的上传数据
pub struct StagingBufferPool {
    ring_buffer_size: usize,
    staging_buffer_size: vk::DeviceSize,
    max_buffer_parts: u64,
    max_image_parts: u64,

    per_frame: Vec<PerFrame>,
    frame_id: usize,

    /// flush / invalidate 的批次，复用分配
    memory_ranges: Vec<MappedMemoryRange>,
}
// new & init
impl StagingBufferPool {
    pub fn new(config: &FrameGraphConfig) -> FgResult<Self> {
        config.validate()?;
        Ok(Self {
            ring_buffer_size: config.ring_buffer_size,
            staging_buffer_size: config.staging_buffer_size,
            max_buffer_parts: config.max_buffer_parts,
            max_image_parts: config.max_image_parts,

            per_frame: Vec::new(),
            frame_id: 0,

            memory_ranges: Vec::with_capacity(64),
        })
    }

    /// 按照 ring buffer 的大小创建每个 slot 的状态
    ///
    /// 配置的 ring 大小必须与 FrameGraph 一致
    pub fn initialize(&mut self, fg: &impl FrameGraphThread) -> FgResult<()> {
        debug_assert!(self.per_frame.is_empty(), "staging buffer pool is already initialized");
        if !self.per_frame.is_empty() {
            log::error!("staging buffer pool is already initialized");
            return Ok(());
        }
        if fg.ring_buffer_size() != self.ring_buffer_size {
            return Err(FgError::InvalidConfig(format!(
                "ring_buffer_size is {} but the frame graph has {} frames in flight",
                self.ring_buffer_size,
                fg.ring_buffer_size()
            )));
        }

        self.per_frame.resize_with(self.ring_buffer_size, PerFrame::default);
        log::debug!(
            "staging buffer pool: {} slots, {} bytes per buffer",
            self.per_frame.len(),
            self.staging_buffer_size
        );
        Ok(())
    }
}
// getter
impl StagingBufferPool {
    #[inline]
    pub fn frame_id(&self) -> usize {
        self.frame_id
    }

    #[inline]
    pub fn ring_size(&self) -> usize {
        self.per_frame.len()
    }

    #[inline]
    pub fn host_to_device_buffers(&self, frame_id: usize) -> &[StagingBuffer] {
        &self.per_frame[frame_id].host_to_device
    }

    #[inline]
    pub fn device_to_host_buffers(&self, frame_id: usize) -> &[StagingBuffer] {
        &self.per_frame[frame_id].device_to_host
    }

    /// 尚未触发的事件数量（buffer, image）
    #[inline]
    pub fn pending_event_count(&self, frame_id: usize) -> (usize, usize) {
        let frame = &self.per_frame[frame_id];
        (frame.buffer_events.len(), frame.image_events.len())
    }
}
// frame
impl StagingBufferPool {
    /// 选择 ring slot
    ///
    /// `is_first` 表示该 slot 在本轮中第一次被使用：此时上一轮的 GPU 工作已经完成，
    /// 可以读取回读数据并重置游标；否则继续在已有数据之后追加。
    pub fn on_begin_frame(&mut self, fg: &mut impl FrameGraphThread, frame_id: usize, is_first: bool) -> FgResult<()> {
        assert!(
            frame_id < self.per_frame.len(),
            "ring slot {} out of {} slots",
            frame_id,
            self.per_frame.len()
        );

        self.frame_id = frame_id;
        self.memory_ranges.clear();

        if is_first {
            self.on_first_usage_in_frame(fg)
        } else {
            self.on_next_usage_in_frame();
            Ok(())
        }
    }

    fn on_first_usage_in_frame(&mut self, fg: &mut impl FrameGraphThread) -> FgResult<()> {
        let PerFrame {
            host_to_device,
            device_to_host,
            buffer_events,
            image_events,
        } = &mut self.per_frame[self.frame_id];

        // device -> host 的 buffer 需要重新映射，并 invalidate 有数据的部分
        for buffer in device_to_host.iter_mut() {
            buffer.map_memory(&*fg)?;

            if buffer.is_coherent() || buffer.is_empty() {
                continue;
            }
            self.memory_ranges.push(buffer.dirty_range());
        }
        if !self.memory_ranges.is_empty() {
            fg.invalidate_mapped_memory_ranges(&self.memory_ranges)?;
            self.memory_ranges.clear();
        }

        for event in buffer_events.drain(..) {
            let Some(parts) = collect_parts(device_to_host, &event.parts, event.total_size) else {
                log::error!("drop buffer load event of {} bytes", event.total_size);
                continue;
            };

            if let Some(callback) = event.callback {
                callback(&BufferView::new(parts));
            }
        }

        for event in image_events.drain(..) {
            let Some(parts) = collect_parts(device_to_host, &event.parts, event.total_size) else {
                log::error!("drop image load event of {} bytes", event.total_size);
                continue;
            };

            if let Some(callback) = event.callback {
                callback(&ImageView::new(
                    parts,
                    event.image_size,
                    event.row_pitch,
                    event.slice_pitch,
                    event.format,
                    event.aspect,
                ));
            }
        }

        for buffer in host_to_device.iter_mut() {
            buffer.recycle();
            buffer.map_memory(&*fg)?;
        }

        for buffer in device_to_host.iter_mut() {
            buffer.recycle();
        }
        Ok(())
    }

    fn on_next_usage_in_frame(&mut self) {
        for buffer in &mut self.per_frame[self.frame_id].host_to_device {
            buffer.continue_usage();
        }
    }

    /// 一次 flush 覆盖本 slot 中所有非 coherent、且本次写入过数据的上传 buffer
    pub fn on_end_frame(&mut self, fg: &mut impl FrameGraphThread) -> FgResult<()> {
        let frame = &self.per_frame[self.frame_id];
        self.memory_ranges.extend(
            frame
                .host_to_device
                .iter()
                .filter(|buffer| !buffer.is_coherent() && !buffer.is_empty())
                .map(StagingBuffer::dirty_range),
        );

        if self.memory_ranges.is_empty() {
            return Ok(());
        }
        let result = fg.flush_mapped_memory_ranges(&self.memory_ranges);
        self.memory_ranges.clear();
        result
    }
}
// upload
impl StagingBufferPool {
    /// 把 `data[src_offset..]` 尽可能多地写入一个上传 buffer
    ///
    /// 返回的 size 可能小于剩余数据，调用方需要循环直到全部写入。
    pub fn store_buffer_data(
        &mut self,
        fg: &mut impl FrameGraphThread,
        data: &[u8],
        src_offset: vk::DeviceSize,
    ) -> FgResult<StagingRegion> {
        // 跳过小于数据 1/N 的剩余空间
        let min_size = (data.len() as u64).div_ceil(self.max_buffer_parts);
        self.store_data(fg, data, src_offset, 0, min_size)
    }

    /// 按行写入 image 数据，写入的大小总是 `src_pitch` 的整数倍
    pub fn store_image_data(
        &mut self,
        fg: &mut impl FrameGraphThread,
        data: &[u8],
        src_offset: vk::DeviceSize,
        src_pitch: vk::DeviceSize,
        src_total_size: vk::DeviceSize,
    ) -> FgResult<StagingRegion> {
        let min_size = src_total_size.div_ceil(self.max_image_parts).max(src_pitch);
        self.store_data(fg, data, src_offset, src_pitch, min_size)
    }

    /// 把所有数据写入上传 buffer，返回每一段所在的位置
    pub fn upload_buffer(&mut self, fg: &mut impl FrameGraphThread, data: &[u8]) -> FgResult<Vec<StagingRegion>> {
        let mut regions = Vec::new();
        let mut offset = 0;
        loop {
            let region = self.store_buffer_data(fg, data, offset)?;
            debug_assert!(region.size > 0 || data.is_empty());
            offset += region.size;
            regions.push(region);

            if offset >= data.len() as u64 {
                break;
            }
        }
        Ok(regions)
    }

    /// 上传 POD 数组
    pub fn store_pod_data<T: bytemuck::Pod>(
        &mut self,
        fg: &mut impl FrameGraphThread,
        data: &[T],
    ) -> FgResult<Vec<StagingRegion>> {
        self.upload_buffer(fg, bytemuck::cast_slice(data))
    }

    fn store_data(
        &mut self,
        fg: &mut impl FrameGraphThread,
        data: &[u8],
        src_offset: vk::DeviceSize,
        src_align: vk::DeviceSize,
        min_size: vk::DeviceSize,
    ) -> FgResult<StagingRegion> {
        if src_offset > data.len() as u64 {
            log::warn!("source offset {} out of {} bytes, nothing to store", src_offset, data.len());
        }
        let src_offset = src_offset.min(data.len() as u64);
        let required = data.len() as u64 - src_offset;

        let index = self.find_or_allocate(fg, EStagingDirection::HostToDevice, required, min_size)?;
        let buffer = &mut self.per_frame[self.frame_id].host_to_device[index];

        let size = align_down(buffer.available().min(required), src_align);
        let dst_offset = buffer.size();
        let begin = src_offset as usize;
        buffer.write(dst_offset, &data[begin..begin + size as usize])?;
        buffer.reserve(size);

        log::trace!("store {} bytes at {:?}+{}", size, buffer.buffer(), dst_offset);
        Ok(buffer.region(dst_offset, size))
    }
}
// read back
impl StagingBufferPool {
    /// 在回读 buffer 中为 `[src_offset, src_total_size)` 预留空间
    ///
    /// 设备写入完成之前数据不可读，需要通过 [`add_data_loaded_event`](Self::add_data_loaded_event) 注册回调。
    pub fn add_pending_load(
        &mut self,
        fg: &mut impl FrameGraphThread,
        src_offset: vk::DeviceSize,
        src_total_size: vk::DeviceSize,
    ) -> FgResult<(StagingRegion, LoadRange)> {
        let min_size = src_total_size.div_ceil(self.max_buffer_parts);
        self.pending_load(fg, src_total_size.saturating_sub(src_offset), 0, min_size)
    }

    /// image 回读，预留的大小总是 `src_pitch` 的整数倍
    pub fn add_pending_image_load(
        &mut self,
        fg: &mut impl FrameGraphThread,
        src_offset: vk::DeviceSize,
        src_total_size: vk::DeviceSize,
        src_pitch: vk::DeviceSize,
    ) -> FgResult<(StagingRegion, LoadRange)> {
        let min_size = src_total_size.div_ceil(self.max_image_parts).max(src_pitch);
        self.pending_load(fg, src_total_size.saturating_sub(src_offset), src_pitch, min_size)
    }

    pub fn add_data_loaded_event(&mut self, event: OnBufferDataLoadedEvent) -> FgResult<()> {
        if event.callback.is_none() || event.parts.is_empty() {
            log::error!("reject buffer load event without callback or parts");
            return Err(FgError::InvalidEvent("callback is unset or parts are empty"));
        }
        self.per_frame[self.frame_id].buffer_events.push(event);
        Ok(())
    }

    pub fn add_image_data_loaded_event(&mut self, event: OnImageDataLoadedEvent) -> FgResult<()> {
        if event.callback.is_none() || event.parts.is_empty() {
            log::error!("reject image load event without callback or parts");
            return Err(FgError::InvalidEvent("callback is unset or parts are empty"));
        }
        self.per_frame[self.frame_id].image_events.push(event);
        Ok(())
    }

    /// 为整个回读预留所有片段并注册回调，返回每一段的位置，调用方据此发出拷贝命令
    pub fn read_back_buffer(
        &mut self,
        fg: &mut impl FrameGraphThread,
        total_size: vk::DeviceSize,
        callback: impl FnOnce(&BufferView<'_>) + 'static,
    ) -> FgResult<Vec<StagingRegion>> {
        let mut event = OnBufferDataLoadedEvent::new(total_size).callback(callback);
        let mut regions = Vec::new();
        let mut offset = 0;
        loop {
            let (region, part) = self.add_pending_load(fg, offset, total_size)?;
            debug_assert!(part.size > 0 || total_size == 0);
            offset += part.size;
            event.add_part(part);
            regions.push(region);

            if offset >= total_size {
                break;
            }
        }

        self.add_data_loaded_event(event)?;
        Ok(regions)
    }

    fn pending_load(
        &mut self,
        fg: &mut impl FrameGraphThread,
        required: vk::DeviceSize,
        src_align: vk::DeviceSize,
        min_size: vk::DeviceSize,
    ) -> FgResult<(StagingRegion, LoadRange)> {
        let index = self.find_or_allocate(fg, EStagingDirection::DeviceToHost, required, min_size)?;
        let buffer = &mut self.per_frame[self.frame_id].device_to_host[index];

        let size = align_down(buffer.available().min(required), src_align);
        let offset = buffer.reserve(size);

        log::trace!("reserve {} bytes at {:?}+{} for read back", size, buffer.buffer(), offset);
        Ok((
            buffer.region(offset, size),
            LoadRange {
                buffer_index: index,
                offset,
                size,
            },
        ))
    }
}
// tools
impl StagingBufferPool {
    /// 选择 staging buffer，没有合适的时创建新的
    fn find_or_allocate(
        &mut self,
        fg: &mut impl FrameGraphThread,
        direction: EStagingDirection,
        required: vk::DeviceSize,
        min_size: vk::DeviceSize,
    ) -> FgResult<usize> {
        let capacity = self.staging_buffer_size;
        let frame_id = self.frame_id;
        let frame = &mut self.per_frame[frame_id];
        let buffers = match direction {
            EStagingDirection::HostToDevice => &mut frame.host_to_device,
            EStagingDirection::DeviceToHost => &mut frame.device_to_host,
        };

        if let Some(index) = select_buffer(buffers, required, min_size) {
            return Ok(index);
        }

        let name = format!("{} {}/{}", direction.debug_name(), buffers.len(), frame_id);
        let buffer = allocate_staging_buffer(fg, direction, capacity, &name)?;
        buffers.push(buffer);
        Ok(buffers.len() - 1)
    }
}
// destroy
impl StagingBufferPool {
    /// 销毁所有 staging buffer，未触发的事件被丢弃
    pub fn deinitialize(&mut self, fg: &mut impl FrameGraphThread) {
        for frame in self.per_frame.drain(..) {
            if !frame.buffer_events.is_empty() || !frame.image_events.is_empty() {
                log::debug!(
                    "drop {} buffer events and {} image events on deinitialize",
                    frame.buffer_events.len(),
                    frame.image_events.len()
                );
            }
            for buffer in frame.device_to_host.iter().chain(frame.host_to_device.iter()) {
                fg.destroy_buffer(buffer.buffer());
            }
        }
    }
}
impl Drop for StagingBufferPool {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.per_frame.is_empty(), "staging buffer pool dropped without deinitialize");
        }
    }
}

/// 优先使用第一个能放下全部数据的 buffer；否则使用剩余空间最大的 buffer，但剩余空间不能小于 `min_size`
fn select_buffer(buffers: &[StagingBuffer], required: vk::DeviceSize, min_size: vk::DeviceSize) -> Option<usize> {
    let mut max_available: Option<usize> = None;
    for (index, buffer) in buffers.iter().enumerate() {
        let available = buffer.available();
        if available >= required {
            return Some(index);
        }
        if max_available.is_none_or(|max| available > buffers[max].available()) {
            max_available = Some(index);
        }
    }
    max_available.filter(|&index| buffers[index].available() >= min_size)
}

fn allocate_staging_buffer(
    fg: &mut impl FrameGraphThread,
    direction: EStagingDirection,
    capacity: vk::DeviceSize,
    name: &str,
) -> FgResult<StagingBuffer> {
    let buffer = fg.create_buffer(direction.memory_type(), &BufferDesc::transfer(capacity), name)?;
    let Some(resource) = fg.buffer_resource(buffer) else {
        fg.destroy_buffer(buffer);
        return Err(FgError::BufferNotFound(buffer));
    };

    let mut staging = StagingBuffer::new(buffer, resource.buffer, resource.memory, capacity);
    if let Err(err) = staging.map_memory(&*fg) {
        fg.destroy_buffer(buffer);
        return Err(err);
    }
    log::debug!("allocate {} ({} bytes)", name, capacity);
    Ok(staging)
}

/// 解析一个事件的所有片段
///
/// 任何片段无法访问，或者片段总大小与事件声明的不一致时返回 None，回调不会被调用。
fn collect_parts<'a>(
    buffers: &'a [StagingBuffer],
    parts: &[LoadRange],
    total_size: vk::DeviceSize,
) -> Option<Vec<&'a [u8]>> {
    let mut slices = Vec::with_capacity(parts.len());
    for part in parts {
        let Some(slice) = buffers
            .get(part.buffer_index)
            .and_then(|buffer| buffer.mapped_slice(part.offset, part.size))
        else {
            log::error!("read back part {:?} is not mapped", part);
            return None;
        };
        slices.push(slice);
    }

    let collected: u64 = slices.iter().map(|slice| slice.len() as u64).sum();
    debug_assert_eq!(collected, total_size, "load event parts mismatch total size");
    if collected != total_size {
        log::error!("load event parts hold {} bytes, expected {}", collected, total_size);
        return None;
    }
    Some(slices)
}

#[inline]
fn align_down(size: vk::DeviceSize, align: vk::DeviceSize) -> vk::DeviceSize {
    if align > 1 { size - size % align } else { size }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use truvis_fg_interface::frame_graph::ResourceManager;
    use truvis_fg_interface::host::HostFrameGraph;

    use super::*;

    const MIB: u64 = 1 << 20;

    fn create_pool(fg: &HostFrameGraph, staging_buffer_size: u64, max_parts: u64) -> StagingBufferPool {
        let config = FrameGraphConfig::default()
            .ring_buffer_size(fg.ring_buffer_size())
            .staging_buffer_size(staging_buffer_size)
            .max_buffer_parts(max_parts)
            .max_image_parts(max_parts);
        let mut pool = StagingBufferPool::new(&config).unwrap();
        pool.initialize(fg).unwrap();
        pool
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_upload_split_into_three_buffers() {
        truvis_crate_tools::init_log::init_test_log();

        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 4 * MIB, 4);
        let data = pattern(10 * MIB as usize);

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let regions = pool.upload_buffer(&mut fg, &data).unwrap();

        let sizes: Vec<_> = regions.iter().map(|r| r.size).collect();
        assert_eq!(sizes, vec![4 * MIB, 4 * MIB, 2 * MIB]);
        assert_eq!(pool.host_to_device_buffers(0).len(), 3);

        let mut staged = Vec::new();
        for region in &regions {
            staged.extend(fg.read_buffer(region.buffer, region.offset, region.size).unwrap());
        }
        assert_eq!(staged, data);

        pool.on_end_frame(&mut fg).unwrap();
        assert_eq!(fg.flushed_ranges().len(), 1);
        let flushed: Vec<_> = fg.flushed_ranges()[0].iter().map(|r| (r.offset, r.size)).collect();
        let base = HostFrameGraph::BUFFER_MEMORY_OFFSET;
        assert_eq!(flushed, vec![(base, 4 * MIB), (base, 4 * MIB), (base, 2 * MIB)]);

        pool.deinitialize(&mut fg);
        assert_eq!(fg.live_buffer_count(), 0);
    }

    #[test]
    fn test_read_back_split_into_three_parts() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 4 * MIB, 4);
        let data = pattern(10 * MIB as usize);
        let loaded: Rc<RefCell<Option<(Vec<usize>, Vec<u8>)>>> = Rc::new(RefCell::new(None));

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let sink = loaded.clone();
        let regions = pool
            .read_back_buffer(&mut fg, 10 * MIB, move |view| {
                let sizes = view.parts().iter().map(|part| part.len()).collect();
                *sink.borrow_mut() = Some((sizes, view.to_vec()));
            })
            .unwrap();
        assert_eq!(pool.device_to_host_buffers(0).len(), 3);
        assert_eq!(pool.pending_event_count(0), (1, 0));

        // 模拟 GPU 把数据拷贝到回读 buffer
        let mut offset = 0usize;
        for region in &regions {
            let end = offset + region.size as usize;
            fg.write_buffer(region.buffer, region.offset, &data[offset..end]).unwrap();
            offset = end;
        }
        pool.on_end_frame(&mut fg).unwrap();

        // 其他 slot 不会触发事件
        pool.on_begin_frame(&mut fg, 1, true).unwrap();
        pool.on_end_frame(&mut fg).unwrap();
        assert!(loaded.borrow().is_none());

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let (sizes, bytes) = loaded.borrow_mut().take().unwrap();
        assert_eq!(sizes, vec![4 * MIB as usize, 4 * MIB as usize, 2 * MIB as usize]);
        assert_eq!(sizes.iter().sum::<usize>(), 10 * MIB as usize);
        assert!(bytes == data);
        assert_eq!(pool.pending_event_count(0), (0, 0));

        let invalidated = fg.invalidated_ranges().last().unwrap();
        assert_eq!(invalidated.len(), 3);

        // 已经触发过的事件不会再次触发
        pool.on_end_frame(&mut fg).unwrap();
        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        assert!(loaded.borrow().is_none());

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_next_usage_appends() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 4096, 3);
        let base = HostFrameGraph::BUFFER_MEMORY_OFFSET;

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let first = pool.store_buffer_data(&mut fg, &pattern(100), 0).unwrap();
        assert_eq!((first.offset, first.size), (0, 100));
        pool.on_end_frame(&mut fg).unwrap();
        assert_eq!(fg.flushed_ranges()[0][0].offset, base);
        assert_eq!(fg.flushed_ranges()[0][0].size, 100);

        pool.on_begin_frame(&mut fg, 0, false).unwrap();
        let second = pool.store_buffer_data(&mut fg, &pattern(50), 0).unwrap();
        assert_eq!(second.offset, 100);
        pool.on_end_frame(&mut fg).unwrap();
        assert_eq!(fg.flushed_ranges()[1][0].offset, base + 100);
        assert_eq!(fg.flushed_ranges()[1][0].size, 50);

        // 新一轮使用，游标回到起点
        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let third = pool.store_buffer_data(&mut fg, &pattern(10), 0).unwrap();
        assert_eq!(third.offset, 0);
        assert_eq!(third.buffer, first.buffer);

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_min_block_and_largest_remainder() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 4096, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let a = pool.store_buffer_data(&mut fg, &pattern(3584), 0).unwrap();
        // 剩余 512 小于 ceil(3648 / 3)，需要新的 buffer
        let b = pool.store_buffer_data(&mut fg, &pattern(3648), 0).unwrap();
        assert_ne!(a.buffer, b.buffer);
        assert_eq!((b.offset, b.size), (0, 3648));

        // 两个 buffer 都放不下 1024：使用剩余空间最大的 a（512）
        let c = pool.store_buffer_data(&mut fg, &pattern(1024), 0).unwrap();
        assert_eq!(c.buffer, a.buffer);
        assert_eq!((c.offset, c.size), (3584, 512));

        // 剩余部分：a 已满，b 剩 448 >= ceil(1024 / 3)
        let d = pool.store_buffer_data(&mut fg, &pattern(1024), 512).unwrap();
        assert_eq!(d.buffer, b.buffer);
        assert_eq!(d.size, 448);
        assert!(pool.host_to_device_buffers(0).iter().all(|buffer| buffer.available() == 0));

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_first_fit_wins() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 4096, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let a = pool.store_buffer_data(&mut fg, &pattern(3500), 0).unwrap();
        let b = pool.store_buffer_data(&mut fg, &pattern(2000), 0).unwrap();
        assert_ne!(a.buffer, b.buffer);

        // a 剩 596，b 剩 2096：a 在前且能放下全部数据
        let c = pool.store_buffer_data(&mut fg, &pattern(500), 0).unwrap();
        assert_eq!(c.buffer, a.buffer);

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_zero_length_transfer() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 1024, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let region = pool.store_buffer_data(&mut fg, &[], 0).unwrap();
        assert_eq!(region.size, 0);
        assert!(fg.buffer_resource(region.buffer).is_some());

        let (_, part) = pool.add_pending_load(&mut fg, 0, 0).unwrap();
        assert_eq!(part.size, 0);

        pool.on_end_frame(&mut fg).unwrap();
        assert!(fg.flushed_ranges().is_empty());

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_coherent_memory_skips_flush() {
        let mut fg = HostFrameGraph::new(2).coherent(true);
        let mut pool = create_pool(&fg, 1024, 3);

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        pool.store_pod_data(&mut fg, &[1.0f32, 2.0, 3.0]).unwrap();
        pool.on_end_frame(&mut fg).unwrap();
        assert!(fg.flushed_ranges().is_empty());

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_store_pod_data() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 1024, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let values = [1u32, 2, 3, 4];
        let regions = pool.store_pod_data(&mut fg, &values).unwrap();
        assert_eq!(regions.len(), 1);
        let bytes = fg.read_buffer(regions[0].buffer, regions[0].offset, regions[0].size).unwrap();
        assert_eq!(bytes.as_slice(), bytemuck::cast_slice::<u32, u8>(&values));

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_invalid_events() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 1024, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let mut no_callback = OnBufferDataLoadedEvent::new(4);
        no_callback.add_part(LoadRange {
            buffer_index: 0,
            offset: 0,
            size: 4,
        });
        assert!(matches!(pool.add_data_loaded_event(no_callback), Err(FgError::InvalidEvent(_))));

        let no_parts = OnBufferDataLoadedEvent::new(4).callback(|_| {});
        assert!(matches!(pool.add_data_loaded_event(no_parts), Err(FgError::InvalidEvent(_))));
        assert_eq!(pool.pending_event_count(0), (0, 0));

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_unresolved_part_drops_event() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 1024, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let (_, part) = pool.add_pending_load(&mut fg, 0, 64).unwrap();
        let called = Rc::new(RefCell::new(false));
        let sink = called.clone();
        let mut event = OnBufferDataLoadedEvent::new(128).callback(move |_| *sink.borrow_mut() = true);
        event.add_part(part);
        // 指向不存在的回读 buffer
        event.add_part(LoadRange {
            buffer_index: 7,
            offset: 0,
            size: 64,
        });
        pool.add_data_loaded_event(event).unwrap();
        pool.on_end_frame(&mut fg).unwrap();

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        assert!(!*called.borrow());
        assert_eq!(pool.pending_event_count(0), (0, 0));

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_source_offset_past_end() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 1024, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let region = pool.store_buffer_data(&mut fg, &pattern(16), 32).unwrap();
        assert_eq!(region.size, 0);

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero_parts = FrameGraphConfig::default().max_buffer_parts(0);
        assert!(matches!(StagingBufferPool::new(&zero_parts), Err(FgError::InvalidConfig(_))));

        let zero_size = FrameGraphConfig::default().staging_buffer_size(0);
        assert!(matches!(StagingBufferPool::new(&zero_size), Err(FgError::InvalidConfig(_))));

        // ring 大小与 FrameGraph 不一致
        let fg = HostFrameGraph::new(3);
        let mut pool = StagingBufferPool::new(&FrameGraphConfig::default().ring_buffer_size(2)).unwrap();
        assert!(matches!(pool.initialize(&fg), Err(FgError::InvalidConfig(_))));
        assert_eq!(pool.ring_size(), 0);
    }

    #[test]
    fn test_allocation_failure() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 1024, 3);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        fg.set_fail_allocations(true);
        assert!(matches!(
            pool.store_buffer_data(&mut fg, &pattern(16), 0),
            Err(FgError::AllocationFailed { .. })
        ));
        assert!(pool.host_to_device_buffers(0).is_empty());

        fg.set_fail_allocations(false);
        assert!(pool.store_buffer_data(&mut fg, &pattern(16), 0).is_ok());

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_store_image_rows() {
        let mut fg = HostFrameGraph::new(2);
        let mut pool = create_pool(&fg, 512, 4);
        pool.on_begin_frame(&mut fg, 0, true).unwrap();

        let data = pattern(1000);
        let first = pool.store_image_data(&mut fg, &data, 0, 100, 1000).unwrap();
        assert_eq!(first.size, 500);
        let second = pool.store_image_data(&mut fg, &data, first.size, 100, 1000).unwrap();
        assert_eq!(second.size, 500);
        assert_ne!(first.buffer, second.buffer);

        pool.deinitialize(&mut fg);
    }

    #[test]
    fn test_image_read_back() {
        let mut fg = HostFrameGraph::new(1);
        let mut pool = create_pool(&fg, 40, 4);
        let extent = vk::Extent3D {
            width: 4,
            height: 4,
            depth: 1,
        };
        let data = pattern(64);
        let rows: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let mut event = OnImageDataLoadedEvent::new(extent, 16, vk::Format::R8G8B8A8_UNORM, vk::ImageAspectFlags::COLOR);
        let mut offset = 0;
        while offset < event.total_size {
            let (region, part) = pool.add_pending_image_load(&mut fg, offset, event.total_size, 16).unwrap();
            assert_eq!(part.size % 16, 0);
            fg.write_buffer(region.buffer, region.offset, &data[offset as usize..(offset + part.size) as usize])
                .unwrap();
            offset += part.size;
            event.add_part(part);
        }
        assert_eq!(event.parts.len(), 2);

        let sink = rows.clone();
        let event = event.callback(move |view| {
            for y in 0..view.extent().height {
                sink.borrow_mut().push(view.row(y, 0).to_vec());
            }
        });
        pool.add_image_data_loaded_event(event).unwrap();
        assert_eq!(pool.pending_event_count(0), (0, 1));
        pool.on_end_frame(&mut fg).unwrap();

        pool.on_begin_frame(&mut fg, 0, true).unwrap();
        let rows = rows.borrow();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3], data[48..64].to_vec());

        pool.deinitialize(&mut fg);
    }
}
