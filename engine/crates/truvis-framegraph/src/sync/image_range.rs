use ash::vk;
use truvis_fg_interface::desc::ImageDesc;

use crate::sync::sub_range::SubRange;

/// image 的子资源范围：连续的 array layer × 连续的 mip level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageRange {
    pub base_layer: u32,
    pub layer_count: u32,
    pub base_mip: u32,
    pub mip_count: u32,
}
// new & init
impl ImageRange {
    #[inline]
    pub fn new(base_layer: u32, layer_count: u32, base_mip: u32, mip_count: u32) -> Self {
        Self {
            base_layer,
            layer_count,
            base_mip,
            mip_count,
        }
    }

    /// 覆盖整个 image
    #[inline]
    pub fn whole(desc: &ImageDesc) -> Self {
        Self::new(0, desc.array_layers, 0, desc.mip_levels)
    }

    /// 单个 mip 的所有 layer
    #[inline]
    pub fn mip(desc: &ImageDesc, mip: u32) -> Self {
        Self::new(0, desc.array_layers, mip, 1)
    }
}
// tools
impl ImageRange {
    /// 是否位于 image 声明的范围之内
    pub fn is_within(&self, desc: &ImageDesc) -> bool {
        self.layer_count > 0
            && self.mip_count > 0
            && self.base_layer as u64 + self.layer_count as u64 <= desc.array_layers as u64
            && self.base_mip as u64 + self.mip_count as u64 <= desc.mip_levels as u64
    }

    /// 线性化为 `mip * array_layers + layer` 上的区间
    ///
    /// 覆盖全部 layer 时只有一个区间，否则每个 mip 一个区间。
    pub fn to_sub_ranges(&self, array_layers: u32) -> Vec<SubRange> {
        let layers = array_layers as u64;
        let base_mip = self.base_mip as u64;
        let mip_count = self.mip_count as u64;

        if self.base_layer == 0 && self.layer_count == array_layers {
            return vec![SubRange::new(base_mip * layers, (base_mip + mip_count) * layers)];
        }

        (base_mip..base_mip + mip_count)
            .map(|mip| {
                let begin = mip * layers + self.base_layer as u64;
                SubRange::new(begin, begin + self.layer_count as u64)
            })
            .collect()
    }
}

/// 把线性化的子资源区间还原为最少的 `vk::ImageSubresourceRange`
///
/// 从 layer 0 开始且跨越整层的部分合并为一个 mip 区间，其余部分按行（单个 mip 的若干 layer）输出。
pub fn to_subresource_ranges(
    range: SubRange,
    array_layers: u32,
    aspect_mask: vk::ImageAspectFlags,
) -> Vec<vk::ImageSubresourceRange> {
    let layers = array_layers as u64;
    let mut result = Vec::new();
    let mut i = range.begin;

    while i < range.end {
        let mip = i / layers;
        let layer = i % layers;
        let remaining = range.end - i;

        if layer == 0 && remaining >= layers {
            let mips = remaining / layers;
            result.push(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: mip as u32,
                level_count: mips as u32,
                base_array_layer: 0,
                layer_count: array_layers,
            });
            i += mips * layers;
        } else {
            let count = (layers - layer).min(remaining);
            result.push(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: mip as u32,
                level_count: 1,
                base_array_layer: layer as u32,
                layer_count: count as u32,
            });
            i += count;
        }
    }
    result
}
