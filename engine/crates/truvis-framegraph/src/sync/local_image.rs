use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use truvis_fg_interface::desc::{ImageDesc, ImageResource, ImageViewDesc};
use truvis_fg_interface::error::FgResult;
use truvis_fg_interface::exe_order::ExeOrderIndex;
use truvis_fg_interface::frame_graph::FrameGraphThread;
use truvis_fg_interface::handles::ImageHandle;
use truvis_fg_interface::resource_state::ResourceState;

use crate::sync::barrier::{GfxBarrierMask, GfxImageBarrier};
use crate::sync::barrier_manager::BarrierManager;
use crate::sync::image_range::{ImageRange, to_subresource_ranges};
use crate::sync::local_resource::{LocalResourceStateTracker, ResourceBarrier};
use crate::sync::sub_range::SubRange;

/// 任务对 image 某个子资源范围的使用声明
#[derive(Clone, Copy, Debug)]
pub struct ImageState {
    pub state: ResourceState,
    pub layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub range: ImageRange,
    pub index: ExeOrderIndex,
}
impl ImageState {
    pub fn new(state: ResourceState, layout: vk::ImageLayout, range: ImageRange, index: ExeOrderIndex) -> Self {
        Self {
            state,
            layout,
            aspect: vk::ImageAspectFlags::empty(),
            range,
            index,
        }
    }

    /// builder
    ///
    /// 为空时使用 image 的全部 aspect
    #[inline]
    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }
}

/// image 在录制线程中的本地镜像
///
/// 不拥有 image 本身，只跟踪状态并缓存 view。元数据通过 `Arc` 与资源管理器共享，只读访问是线程安全的。
pub struct LocalImage {
    image: Arc<ImageResource>,
    tracker: LocalResourceStateTracker,
    view_map: HashMap<ImageViewDesc, vk::ImageView>,
}
// new & init
impl LocalImage {
    pub fn new(image: Arc<ImageResource>) -> Self {
        let tracker = LocalResourceStateTracker::new(
            SubRange::new(0, image.desc.subresource_count()),
            image.desc.initial_layout,
        );
        Self {
            image,
            tracker,
            view_map: HashMap::new(),
        }
    }
}
// getter
impl LocalImage {
    #[inline]
    pub fn handle(&self) -> ImageHandle {
        self.image.handle
    }

    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.image.image
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.image.desc
    }

    #[inline]
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.image.desc.aspect_mask()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.desc.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.desc.extent.height
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.image.desc.extent.depth
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.image.desc.array_layers
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.image.desc.mip_levels
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.desc.format
    }

    /// 只读的状态视图，用于调试和测试
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
impl LocalImage {
    pub fn add_pending_state(&mut self, state: &ImageState) {
        let desc = &self.image.desc;
        let in_bounds = state.range.is_within(desc);
        debug_assert!(
            in_bounds,
            "image range {:?} out of image {} (layers {}, mips {})",
            state.range, self.image.name, desc.array_layers, desc.mip_levels
        );
        if !in_bounds {
            log::error!("skip out of range image state {:?} on {}", state.range, self.image.name);
            return;
        }
        debug_assert!(
            self.aspect_mask().contains(state.aspect),
            "aspect {:?} is not part of image {}",
            state.aspect,
            self.image.name
        );

        for range in state.range.to_sub_ranges(desc.array_layers) {
            self.tracker.add_pending_state(range, state.layout, state.state, state.index);
        }
    }

    /// 计算并提交 barrier
    ///
    /// depth/stencil 格式总是同时转换两个 aspect。
    pub fn commit_barrier(&mut self, barrier_mgr: &mut BarrierManager) {
        let aspect_mask = self.aspect_mask();
        let array_layers = self.array_layers();

        for transition in self.tracker.commit() {
            let mask = GfxBarrierMask::new(transition.src, transition.dst);
            for subresource_range in to_subresource_ranges(transition.range, array_layers, aspect_mask) {
                barrier_mgr.add_image_barrier(
                    GfxImageBarrier::new()
                        .image(self.image.image)
                        .layout_transfer(transition.old_layout, transition.new_layout)
                        .mask(mask)
                        .subresource_range(subresource_range),
                );
            }
        }
    }

    /// 获取 view，不存在时创建并缓存
    pub fn get_view(&mut self, fg: &mut impl FrameGraphThread, desc: &ImageViewDesc) -> FgResult<vk::ImageView> {
        if let Some(view) = self.view_map.get(desc) {
            return Ok(*view);
        }

        let view = fg.create_image_view(self.image.handle, desc)?;
        log::trace!("create view {:?} for image {}", view, self.image.name);
        self.view_map.insert(*desc, view);
        Ok(view)
    }

    /// 覆盖整个 image 的 view
    pub fn get_default_view(&mut self, fg: &mut impl FrameGraphThread) -> FgResult<vk::ImageView> {
        let desc = ImageViewDesc::from_image(&self.image.desc);
        self.get_view(fg, &desc)
    }

    /// 只查询缓存，不创建
    #[inline]
    pub fn cached_view(&self, desc: &ImageViewDesc) -> Option<vk::ImageView> {
        self.view_map.get(desc).copied()
    }
}
// destroy
impl LocalImage {
    /// 销毁缓存的 view，并丢弃所有状态
    pub fn destroy(&mut self, fg: &mut impl FrameGraphThread) {
        for (_, view) in self.view_map.drain() {
            fg.destroy_image_view(view);
        }
        self.tracker.reset();
    }
}
impl Drop for LocalImage {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.view_map.is_empty(), "image {} dropped with live views", self.image.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use truvis_fg_interface::desc::EMemoryType;
    use truvis_fg_interface::frame_graph::ResourceManager;
    use truvis_fg_interface::host::HostFrameGraph;

    fn create_image(fg: &mut HostFrameGraph, format: vk::Format, mips: u32, layers: u32) -> LocalImage {
        let desc = ImageDesc::new_2d(
            vk::Extent2D {
                width: 256,
                height: 256,
            },
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
        .mip_levels(mips)
        .array_layers(layers);
        let handle = fg.create_image(EMemoryType::Default, &desc, "test-image").unwrap();
        LocalImage::new(fg.image_resource(handle).unwrap())
    }

    #[test]
    fn test_render_then_sample() {
        truvis_crate_tools::init_log::init_test_log();

        let mut fg = HostFrameGraph::new(2);
        let mut image = create_image(&mut fg, vk::Format::R8G8B8A8_UNORM, 1, 1);
        let mut barriers = BarrierManager::new();
        let whole = ImageRange::whole(image.desc());

        image.add_pending_state(&ImageState::new(
            ResourceState::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            whole,
            ExeOrderIndex::new(1),
        ));
        image.commit_barrier(&mut barriers);
        assert_eq!(barriers.image_barriers().len(), 1);
        let first = *barriers.image_barriers()[0].inner();
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(first.image, image.vk_image());
        barriers.clear();

        image.add_pending_state(&ImageState::new(
            ResourceState::SHADER_SAMPLE_FRAGMENT,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            whole,
            ExeOrderIndex::new(2),
        ));
        image.commit_barrier(&mut barriers);
        let second = *barriers.image_barriers()[0].inner();
        assert_eq!(second.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(second.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(second.src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(second.dst_stage_mask, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        barriers.clear();

        // 再次采样：只读到只读，不需要 barrier
        image.add_pending_state(&ImageState::new(
            ResourceState::SHADER_SAMPLE_COMPUTE,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            whole,
            ExeOrderIndex::new(3),
        ));
        image.commit_barrier(&mut barriers);
        assert!(barriers.is_empty());
        assert_eq!(image.read_write_barriers().len(), 1);
        assert_eq!(image.read_write_barriers()[0].index, ExeOrderIndex::new(3));
    }

    #[test]
    fn test_mip_chain_generation() {
        let mut fg = HostFrameGraph::new(2);
        let mut image = create_image(&mut fg, vk::Format::R8G8B8A8_UNORM, 4, 2);
        let mut barriers = BarrierManager::new();

        image.add_pending_state(&ImageState::new(
            ResourceState::TRANSFER_DST,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageRange::whole(image.desc()),
            ExeOrderIndex::new(1),
        ));
        image.commit_barrier(&mut barriers);
        assert_eq!(barriers.image_barriers().len(), 1);
        barriers.clear();

        // 生成 mip：mip 0 变为传输源，其余保持传输目标
        image.add_pending_state(&ImageState::new(
            ResourceState::TRANSFER_SRC,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageRange::mip(image.desc(), 0),
            ExeOrderIndex::new(2),
        ));
        image.commit_barrier(&mut barriers);
        assert_eq!(barriers.image_barriers().len(), 1);
        let range = barriers.image_barriers()[0].inner().subresource_range;
        assert_eq!((range.base_mip_level, range.level_count), (0, 1));
        assert_eq!((range.base_array_layer, range.layer_count), (0, 2));
        barriers.clear();

        let summary: Vec<_> = image.read_write_barriers().iter().map(|b| (b.range, b.layout)).collect();
        assert_eq!(
            summary,
            vec![
                (SubRange::new(0, 2), vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
                (SubRange::new(2, 8), vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            ]
        );

        // 整个 image 转为采样：两个不同的旧状态，各自一个 barrier
        image.add_pending_state(&ImageState::new(
            ResourceState::SHADER_SAMPLE_FRAGMENT,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageRange::whole(image.desc()),
            ExeOrderIndex::new(3),
        ));
        image.commit_barrier(&mut barriers);
        let old_layouts: Vec<_> = barriers.image_barriers().iter().map(|b| b.inner().old_layout).collect();
        assert_eq!(
            old_layouts,
            vec![vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL]
        );
    }

    #[test]
    fn test_partial_layers_split_per_mip() {
        let mut fg = HostFrameGraph::new(2);
        let mut image = create_image(&mut fg, vk::Format::R8G8B8A8_UNORM, 2, 6);
        let mut barriers = BarrierManager::new();

        image.add_pending_state(&ImageState::new(
            ResourceState::STORAGE_WRITE_COMPUTE,
            vk::ImageLayout::GENERAL,
            ImageRange::new(2, 3, 0, 2),
            ExeOrderIndex::new(1),
        ));
        assert_eq!(image.pending_barriers().len(), 2);
        image.commit_barrier(&mut barriers);

        let ranges: Vec<_> = barriers
            .image_barriers()
            .iter()
            .map(|b| {
                let r = b.inner().subresource_range;
                (r.base_mip_level, r.base_array_layer, r.layer_count)
            })
            .collect();
        assert_eq!(ranges, vec![(0, 2, 3), (1, 2, 3)]);
    }

    #[test]
    fn test_depth_stencil_aspect() {
        let mut fg = HostFrameGraph::new(2);
        let mut image = create_image(&mut fg, vk::Format::D24_UNORM_S8_UINT, 1, 1);
        let mut barriers = BarrierManager::new();

        image.add_pending_state(
            &ImageState::new(
                ResourceState::DEPTH_STENCIL_ATTACHMENT_READ_WRITE,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ImageRange::whole(image.desc()),
                ExeOrderIndex::FIRST,
            )
            .aspect(vk::ImageAspectFlags::DEPTH),
        );
        image.commit_barrier(&mut barriers);
        assert_eq!(
            barriers.image_barriers()[0].inner().subresource_range.aspect_mask,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_view_cache() {
        let mut fg = HostFrameGraph::new(2);
        let mut image = create_image(&mut fg, vk::Format::R8G8B8A8_UNORM, 4, 1);

        let default_view = image.get_default_view(&mut fg).unwrap();
        assert_eq!(image.get_default_view(&mut fg).unwrap(), default_view);

        let mut mip1 = ImageViewDesc::from_image(image.desc());
        mip1.base_mip = 1;
        mip1.mip_count = 1;
        assert!(image.cached_view(&mip1).is_none());
        let mip1_view = image.get_view(&mut fg, &mip1).unwrap();
        assert_ne!(mip1_view, default_view);
        assert_eq!(image.cached_view(&mip1), Some(mip1_view));
        assert_eq!(fg.live_view_count(), 2);

        image.destroy(&mut fg);
        assert_eq!(fg.live_view_count(), 0);
        assert!(image.cached_view(&mip1).is_none());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of image")]
    fn test_out_of_range_layer() {
        let mut fg = HostFrameGraph::new(2);
        let mut image = create_image(&mut fg, vk::Format::R8G8B8A8_UNORM, 1, 2);
        image.add_pending_state(&ImageState::new(
            ResourceState::SHADER_SAMPLE_FRAGMENT,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageRange::new(1, 2, 0, 1),
            ExeOrderIndex::FIRST,
        ));
    }
}
