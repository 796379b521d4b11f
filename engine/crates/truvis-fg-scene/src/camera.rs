use crate::render_layer::{ERenderLayer, RenderLayerBits};

/// 一个相机配置：需要渲染的 layer 以及变换矩阵
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub name: String,
    pub layers: RenderLayerBits,
    pub view: glam::Mat4,
    pub proj: glam::Mat4,
}
impl Default for CameraInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            layers: RenderLayerBits::empty(),
            view: glam::Mat4::IDENTITY,
            proj: glam::Mat4::IDENTITY,
        }
    }
}
impl CameraInfo {
    pub fn new(name: impl Into<String>, layers: RenderLayerBits) -> Self {
        Self {
            name: name.into(),
            layers,
            ..Default::default()
        }
    }

    /// builder
    #[inline]
    pub fn view_proj(mut self, view: glam::Mat4, proj: glam::Mat4) -> Self {
        self.view = view;
        self.proj = proj;
        self
    }

    #[inline]
    pub fn has_layer(&self, layer: ERenderLayer) -> bool {
        self.layers.contains(layer.bit())
    }

    #[inline]
    pub fn view_proj_matrix(&self) -> glam::Mat4 {
        self.proj * self.view
    }
}
