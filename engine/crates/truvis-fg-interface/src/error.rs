use thiserror::Error;

use crate::handles::{BufferHandle, ImageHandle, MemoryHandle};

/// FrameGraph 核心可以恢复的错误
///
/// 只包含资源耗尽和查询失败。调用方遇到错误时应当放弃当前帧的录制，
/// 核心内部不做重试。编程错误（重复启用 layer、越界的子资源等）通过断言处理，不在此列。
#[derive(Debug, Error)]
pub enum FgError {
    #[error("failed to allocate {size} bytes of {kind} memory")]
    AllocationFailed { kind: &'static str, size: u64 },

    #[error("buffer {0:?} is not registered in resource manager")]
    BufferNotFound(BufferHandle),

    #[error("image {0:?} is not registered in resource manager")]
    ImageNotFound(ImageHandle),

    #[error("memory {0:?} is not registered in resource manager")]
    MemoryNotFound(MemoryHandle),

    #[error("memory {0:?} is not host visible")]
    MemoryNotMapped(MemoryHandle),

    #[error("invalid data loaded event: {0}")]
    InvalidEvent(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),
}

pub type FgResult<T> = Result<T, FgError>;
