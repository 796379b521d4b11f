use std::collections::HashMap;
use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;
use truvis_fg_interface::desc::{EMemoryType, ImageDesc};
use truvis_fg_interface::frame_graph::FrameGraphThread;
use truvis_fg_interface::handles::ImageHandle;
use truvis_framegraph::staging::{StagingBufferPool, StagingRegion};

/// 解码之后、还没有上传到 GPU 的图像数据
#[derive(Clone, Debug)]
pub struct IntermImage {
    pub name: String,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub data: Vec<u8>,
}

/// 图像数据与 GPU image 的缓存
///
/// 缓存不持有数据：数据由使用者通过 `Arc` 持有，缓存只保留 `Weak`。
/// 数据被释放之后，对应的 GPU image 会在 [`release_unused`](ImageCache::release_unused) 中销毁。
pub trait ImageCache {
    /// 按文件名查找仍然存活的图像数据
    fn get_image_data(&self, filename: &str) -> Option<Arc<IntermImage>>;

    /// 已经存在存活的同名数据时返回 false
    fn add_image_data(&mut self, filename: &str, image: &Arc<IntermImage>) -> bool;

    fn get_image_handle(&self, image: &Arc<IntermImage>) -> Option<ImageHandle>;

    /// 已经存在同一份数据的 image 时返回 false
    fn add_image_handle(&mut self, image: &Arc<IntermImage>, handle: ImageHandle) -> bool;

    fn get_default_image(&self, name: &str) -> Option<ImageHandle>;

    /// 销毁上一次调用时发现的无用 image，并收集本次新的无用 image
    ///
    /// image 可能仍被正在执行的帧使用，因此延迟一次调用再销毁。
    fn release_unused(&mut self, fg: &mut dyn FrameGraphThread);

    fn destroy(&mut self, fg: &mut dyn FrameGraphThread);
}

/// 默认 image 上传时需要执行的拷贝
#[derive(Clone, Debug)]
pub struct DefaultImageUpload {
    pub name: &'static str,
    pub image: ImageHandle,
    pub extent: vk::Extent2D,
    pub regions: Vec<StagingRegion>,
}

#[derive(Default)]
pub struct DefaultImageCache {
    data_cache: HashMap<String, Weak<IntermImage>>,
    /// key 是数据的地址，配合 `Weak` 判断数据是否还存活
    handle_cache: HashMap<usize, (Weak<IntermImage>, ImageHandle)>,
    ready_to_delete: Vec<ImageHandle>,
    default_images: HashMap<&'static str, ImageHandle>,
}
// new & init
impl DefaultImageCache {
    const DEFAULT_IMAGES: [(&'static str, [u8; 4]); 3] = [
        ("white", [255, 255, 255, 255]),
        ("black", [0, 0, 0, 255]),
        ("normal", [128, 128, 255, 255]),
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// 创建 1x1 的默认 image，像素数据写入 staging buffer
    ///
    /// 需要在 `staging` 的 `on_begin_frame` 之后调用，返回的拷贝由调用方录制。
    pub fn create(
        &mut self,
        fg: &mut impl FrameGraphThread,
        staging: &mut StagingBufferPool,
    ) -> anyhow::Result<Vec<DefaultImageUpload>> {
        let extent = vk::Extent2D { width: 1, height: 1 };
        let desc = ImageDesc::new_2d(
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        );

        let mut uploads = Vec::with_capacity(Self::DEFAULT_IMAGES.len());
        for (name, pixel) in Self::DEFAULT_IMAGES {
            let image = fg
                .create_image(EMemoryType::Default, &desc, name)
                .with_context(|| format!("failed to create default image {}", name))?;
            self.default_images.insert(name, image);

            let regions = staging
                .store_pod_data(fg, &pixel)
                .with_context(|| format!("failed to stage default image {}", name))?;
            uploads.push(DefaultImageUpload {
                name,
                image,
                extent,
                regions,
            });
        }

        log::info!("default images created: {}", uploads.len());
        Ok(uploads)
    }
}
// getter
impl DefaultImageCache {
    #[inline]
    pub fn image_count(&self) -> usize {
        self.handle_cache.len()
    }

    #[inline]
    pub fn ready_to_delete_count(&self) -> usize {
        self.ready_to_delete.len()
    }
}
impl ImageCache for DefaultImageCache {
    fn get_image_data(&self, filename: &str) -> Option<Arc<IntermImage>> {
        self.data_cache.get(filename).and_then(Weak::upgrade)
    }

    fn add_image_data(&mut self, filename: &str, image: &Arc<IntermImage>) -> bool {
        if self.get_image_data(filename).is_some() {
            return false;
        }
        self.data_cache.insert(filename.to_string(), Arc::downgrade(image));
        true
    }

    fn get_image_handle(&self, image: &Arc<IntermImage>) -> Option<ImageHandle> {
        self.handle_cache
            .get(&(Arc::as_ptr(image) as usize))
            .filter(|(data, _)| data.upgrade().is_some_and(|data| Arc::ptr_eq(&data, image)))
            .map(|(_, handle)| *handle)
    }

    fn add_image_handle(&mut self, image: &Arc<IntermImage>, handle: ImageHandle) -> bool {
        let key = Arc::as_ptr(image) as usize;
        match self.handle_cache.get(&key) {
            Some((data, _)) if data.strong_count() > 0 => false,
            Some((_, stale)) => {
                // 地址被新的数据复用，旧的 image 进入延迟销毁
                self.ready_to_delete.push(*stale);
                self.handle_cache.insert(key, (Arc::downgrade(image), handle));
                true
            }
            None => {
                self.handle_cache.insert(key, (Arc::downgrade(image), handle));
                true
            }
        }
    }

    fn get_default_image(&self, name: &str) -> Option<ImageHandle> {
        self.default_images.get(name).copied()
    }

    fn release_unused(&mut self, fg: &mut dyn FrameGraphThread) {
        for handle in self.ready_to_delete.drain(..) {
            fg.destroy_image(handle);
        }

        let ready_to_delete = &mut self.ready_to_delete;
        self.handle_cache.retain(|_, (data, handle)| {
            if data.strong_count() > 0 {
                true
            } else {
                ready_to_delete.push(*handle);
                false
            }
        });
        self.data_cache.retain(|_, data| data.strong_count() > 0);

        if !self.ready_to_delete.is_empty() {
            log::debug!("{} images are ready to delete", self.ready_to_delete.len());
        }
    }

    fn destroy(&mut self, fg: &mut dyn FrameGraphThread) {
        let handles = self.ready_to_delete.drain(..);
        let handles = handles.chain(self.handle_cache.drain().map(|(_, (_, handle))| handle));
        let handles = handles.chain(self.default_images.drain().map(|(_, handle)| handle));
        for handle in handles {
            fg.destroy_image(handle);
        }
        self.data_cache.clear();
    }
}
impl Drop for DefaultImageCache {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.handle_cache.is_empty() && self.ready_to_delete.is_empty() && self.default_images.is_empty(),
                "image cache dropped without destroy"
            );
        }
    }
}
