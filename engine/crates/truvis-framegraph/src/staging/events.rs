//! 回读完成事件
//!
//! 一次逻辑上的回读可能被拆分到多个 staging buffer 中，每一段是一个 [`LoadRange`]。
//! 回调拿到的 view 按顺序拼接这些片段。

use ash::vk;

/// device -> host staging buffer 中预留的一段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadRange {
    /// 所属 ring slot 中 device -> host buffer 的序号
    pub buffer_index: usize,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// 回读的 buffer 数据，由若干连续片段组成
pub struct BufferView<'a> {
    parts: Vec<&'a [u8]>,
}
impl<'a> BufferView<'a> {
    pub fn new(parts: Vec<&'a [u8]>) -> Self {
        Self { parts }
    }

    #[inline]
    pub fn parts(&self) -> &[&'a [u8]] {
        &self.parts
    }

    pub fn size(&self) -> usize {
        self.parts.iter().map(|part| part.len()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 拼接所有片段
    pub fn to_vec(&self) -> Vec<u8> {
        self.parts.concat()
    }
}

/// 回读的 image 数据
///
/// 每个片段的大小都是 row pitch 的整数倍，因此任意一行都完整地位于某一个片段中。
pub struct ImageView<'a> {
    parts: Vec<&'a [u8]>,
    extent: vk::Extent3D,
    row_pitch: vk::DeviceSize,
    slice_pitch: vk::DeviceSize,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
}
impl<'a> ImageView<'a> {
    pub fn new(
        parts: Vec<&'a [u8]>,
        extent: vk::Extent3D,
        row_pitch: vk::DeviceSize,
        slice_pitch: vk::DeviceSize,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            parts,
            extent,
            row_pitch,
            slice_pitch,
            format,
            aspect,
        }
    }

    #[inline]
    pub fn parts(&self) -> &[&'a [u8]] {
        &self.parts
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn row_pitch(&self) -> vk::DeviceSize {
        self.row_pitch
    }

    #[inline]
    pub fn slice_pitch(&self) -> vk::DeviceSize {
        self.slice_pitch
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// 第 `z` 个切片的第 `y` 行
    pub fn row(&self, y: u32, z: u32) -> &'a [u8] {
        debug_assert!(y < self.extent.height && z < self.extent.depth);

        let mut offset = z as u64 * self.slice_pitch + y as u64 * self.row_pitch;
        for part in &self.parts {
            let len = part.len() as u64;
            if offset < len {
                debug_assert!(offset + self.row_pitch <= len, "row straddles two parts");
                let begin = offset as usize;
                return &part[begin..begin + self.row_pitch as usize];
            }
            offset -= len;
        }
        &[]
    }
}

pub type OnBufferDataLoadedFn = Box<dyn FnOnce(&BufferView<'_>)>;
pub type OnImageDataLoadedFn = Box<dyn FnOnce(&ImageView<'_>)>;

/// buffer 回读完成事件
pub struct OnBufferDataLoadedEvent {
    pub callback: Option<OnBufferDataLoadedFn>,
    pub parts: Vec<LoadRange>,
    pub total_size: vk::DeviceSize,
}
impl OnBufferDataLoadedEvent {
    pub fn new(total_size: vk::DeviceSize) -> Self {
        Self {
            callback: None,
            parts: Vec::new(),
            total_size,
        }
    }

    /// builder
    pub fn callback(mut self, callback: impl FnOnce(&BufferView<'_>) + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    #[inline]
    pub fn add_part(&mut self, part: LoadRange) {
        self.parts.push(part);
    }
}

/// image 回读完成事件
pub struct OnImageDataLoadedEvent {
    pub callback: Option<OnImageDataLoadedFn>,
    pub parts: Vec<LoadRange>,
    pub total_size: vk::DeviceSize,
    pub image_size: vk::Extent3D,
    pub row_pitch: vk::DeviceSize,
    pub slice_pitch: vk::DeviceSize,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}
impl OnImageDataLoadedEvent {
    pub fn new(
        image_size: vk::Extent3D,
        row_pitch: vk::DeviceSize,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        let slice_pitch = row_pitch * image_size.height as u64;
        Self {
            callback: None,
            parts: Vec::new(),
            total_size: slice_pitch * image_size.depth as u64,
            image_size,
            row_pitch,
            slice_pitch,
            format,
            aspect,
        }
    }

    /// builder
    pub fn callback(mut self, callback: impl FnOnce(&ImageView<'_>) + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    #[inline]
    pub fn add_part(&mut self, part: LoadRange) {
        self.parts.push(part);
    }
}
