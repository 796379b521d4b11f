//! 资源描述
//!
//! 所有描述在资源创建后都是只读的，可以在任意线程并发读取。

use std::ptr::NonNull;

use ash::vk;

use crate::handles::{BufferHandle, ImageHandle, MemoryHandle, RenderPassHandle, TaskHandle};

/// 内存类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EMemoryType {
    /// device local，CPU 不可见
    #[default]
    Default,
    /// host visible，CPU 写、GPU 读（上传）
    HostWrite,
    /// host visible + cached，GPU 写、CPU 读（回读）
    HostRead,
}
impl EMemoryType {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::Default)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}
impl BufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self { size, usage }
    }

    /// 同时可作为传输源和目标，staging buffer 使用
    #[inline]
    pub fn transfer(size: vk::DeviceSize) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    /// 创建时的 layout，资源第一次被使用时需要从该 layout 转换
    pub initial_layout: vk::ImageLayout,
}
// new & builder
impl ImageDesc {
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    /// builder
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// builder
    #[inline]
    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    /// builder
    #[inline]
    pub fn initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }
}
// tools
impl ImageDesc {
    /// 根据 format 推断 aspect flags
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        match self.format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }

            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }

            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    /// 状态跟踪使用的子资源数量：mip_levels * array_layers
    #[inline]
    pub fn subresource_count(&self) -> u64 {
        self.mip_levels as u64 * self.array_layers as u64
    }
}

/// ImageView 描述，同时作为 view 缓存的 key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageViewDesc {
    pub view_type: vk::ImageViewType,
    /// format 可以基于 vk::Image 重解释
    pub format: vk::Format,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}
impl ImageViewDesc {
    /// 覆盖整个 image 的默认视图
    pub fn from_image(desc: &ImageDesc) -> Self {
        let view_type = match (desc.image_type, desc.array_layers) {
            (vk::ImageType::TYPE_1D, 1) => vk::ImageViewType::TYPE_1D,
            (vk::ImageType::TYPE_1D, _) => vk::ImageViewType::TYPE_1D_ARRAY,
            (vk::ImageType::TYPE_3D, _) => vk::ImageViewType::TYPE_3D,
            (_, 1) => vk::ImageViewType::TYPE_2D,
            (_, _) => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        Self {
            view_type,
            format: desc.format,
            aspect_mask: desc.aspect_mask(),
            base_mip: 0,
            mip_count: desc.mip_levels,
            base_layer: 0,
            layer_count: desc.array_layers,
        }
    }

    #[inline]
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask,
            base_mip_level: self.base_mip,
            level_count: self.mip_count,
            base_array_layer: self.base_layer,
            layer_count: self.layer_count,
        }
    }
}

/// 资源管理器中 image 的只读元数据
#[derive(Debug)]
pub struct ImageResource {
    pub handle: ImageHandle,
    pub image: vk::Image,
    pub desc: ImageDesc,
    pub name: String,
}

/// 资源管理器中 buffer 的只读元数据
#[derive(Debug)]
pub struct BufferResource {
    pub handle: BufferHandle,
    pub buffer: vk::Buffer,
    pub desc: BufferDesc,
    /// 绑定的设备内存
    pub memory: MemoryHandle,
    pub name: String,
}

/// 设备内存的映射信息
///
/// 内存可能在碎片整理时被重新分配，因此映射指针需要每帧重新查询。
#[derive(Clone, Copy, Debug)]
pub struct MemoryInfo {
    pub memory: vk::DeviceMemory,
    /// buffer 在整块内存中的偏移
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    /// 已经加上 offset 的映射指针，device local 内存为 None
    pub mapped_ptr: Option<NonNull<u8>>,
    pub flags: vk::MemoryPropertyFlags,
}
impl MemoryInfo {
    #[inline]
    pub fn is_coherent(&self) -> bool {
        self.flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }
}

/// 需要 flush 或 invalidate 的一段映射内存
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedMemoryRange {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}
impl MappedMemoryRange {
    #[inline]
    pub fn to_vk(&self) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default().memory(self.memory).offset(self.offset).size(self.size)
    }
}

/// RenderPass 描述，交给调度器创建 RenderPass
#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub name: String,
    pub render_area: vk::Rect2D,
    pub color_targets: Vec<ImageHandle>,
    pub depth_target: Option<ImageHandle>,
}

/// 提交一个 RenderPass 任务
///
/// `pass` 为 None 时表示一个空 pass，只参与依赖链。
#[derive(Clone, Debug, Default)]
pub struct SubmitRenderPass {
    pub pass: Option<RenderPassHandle>,
    pub name: String,
    pub depends_on: Vec<TaskHandle>,
}
impl SubmitRenderPass {
    #[inline]
    pub fn new(pass: RenderPassHandle) -> Self {
        Self {
            pass: Some(pass),
            ..Default::default()
        }
    }

    /// builder
    #[inline]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on(&mut self, task: TaskHandle) {
        if !self.depends_on.contains(&task) {
            self.depends_on.push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_mask() {
        let color = ImageDesc::new_2d(
            vk::Extent2D { width: 4, height: 4 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(color.aspect_mask(), vk::ImageAspectFlags::COLOR);

        let depth = ImageDesc {
            format: vk::Format::D24_UNORM_S8_UINT,
            ..color
        };
        assert_eq!(depth.aspect_mask(), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
    }

    #[test]
    fn test_default_view() {
        let desc = ImageDesc::new_2d(
            vk::Extent2D { width: 8, height: 8 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        )
        .mip_levels(4)
        .array_layers(6);

        let view = ImageViewDesc::from_image(&desc);
        assert_eq!(view.view_type, vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(view.subresource_range().level_count, 4);
        assert_eq!(view.subresource_range().layer_count, 6);
        assert_eq!(desc.subresource_count(), 24);
    }

    #[test]
    fn test_submit_pass_dedup_dependency() {
        let mut tasks = slotmap::SlotMap::<TaskHandle, ()>::with_key();
        let task = tasks.insert(());

        let mut submit = SubmitRenderPass::default();
        submit.depends_on(task);
        submit.depends_on(task);
        assert_eq!(submit.depends_on.len(), 1);
    }
}
