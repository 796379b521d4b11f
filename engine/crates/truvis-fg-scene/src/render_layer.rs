use bitflags::bitflags;

/// 渲染层，按照从背景到前景的顺序声明，提交时按该顺序串行执行
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ERenderLayer {
    Background,
    Shadow,
    DepthOnly,
    Opaque,
    Translucent,
    PostProcess,
    UI,
}
impl ERenderLayer {
    pub const COUNT: usize = 7;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Background,
        Self::Shadow,
        Self::DepthOnly,
        Self::Opaque,
        Self::Translucent,
        Self::PostProcess,
        Self::UI,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn bit(self) -> RenderLayerBits {
        RenderLayerBits::from_bits_truncate(1 << self as u32)
    }
}

bitflags! {
    /// 相机需要渲染的 layer 集合
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RenderLayerBits : u32 {
        const Background = 1 << 0;
        const Shadow = 1 << 1;
        const DepthOnly = 1 << 2;
        const Opaque = 1 << 3;
        const Translucent = 1 << 4;
        const PostProcess = 1 << 5;
        const UI = 1 << 6;
    }
}
