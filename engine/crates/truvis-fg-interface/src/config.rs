use serde::Deserialize;

use crate::error::{FgError, FgResult};

/// FrameGraph 核心的配置
///
/// 可以从 toml 中读取，缺失的字段使用默认值：
///
/// ```toml
/// ring_buffer_size = 2
/// staging_buffer_size = 16777216
/// max_buffer_parts = 3
/// max_image_parts = 4
/// log_level = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameGraphConfig {
    /// 同时在飞行中的帧数
    pub ring_buffer_size: usize,
    /// 每个 staging buffer 的固定容量（字节）
    pub staging_buffer_size: u64,
    /// 一次 buffer 传输最多被拆分成多少段
    pub max_buffer_parts: u64,
    /// 一次 image 传输最多被拆分成多少段
    pub max_image_parts: u64,
    pub log_level: String,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 2,
            staging_buffer_size: 16 << 20,
            max_buffer_parts: 3,
            max_image_parts: 4,
            log_level: "info".to_string(),
        }
    }
}

impl FrameGraphConfig {
    pub const MAX_RING_BUFFER_SIZE: usize = 8;

    pub fn from_toml_str(s: &str) -> FgResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| FgError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        log::debug!("frame graph config: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> FgResult<()> {
        if self.ring_buffer_size == 0 || self.ring_buffer_size > Self::MAX_RING_BUFFER_SIZE {
            return Err(FgError::InvalidConfig(format!(
                "ring_buffer_size must be in [1, {}], got {}",
                Self::MAX_RING_BUFFER_SIZE,
                self.ring_buffer_size
            )));
        }
        if self.staging_buffer_size == 0 {
            return Err(FgError::InvalidConfig("staging_buffer_size must be non-zero".to_string()));
        }
        if self.max_buffer_parts == 0 || self.max_image_parts == 0 {
            return Err(FgError::InvalidConfig("max parts must be non-zero".to_string()));
        }
        self.log_level_filter()?;
        Ok(())
    }

    pub fn log_level_filter(&self) -> FgResult<log::LevelFilter> {
        self.log_level
            .parse::<log::LevelFilter>()
            .map_err(|_| FgError::InvalidConfig(format!("unknown log level: {}", self.log_level)))
    }

    /// 按照 `log_level` 初始化全局 logger
    pub fn init_log(&self) -> FgResult<()> {
        truvis_crate_tools::init_log::init_log(self.log_level_filter()?);
        Ok(())
    }

    /// builder
    #[inline]
    pub fn staging_buffer_size(mut self, size: u64) -> Self {
        self.staging_buffer_size = size;
        self
    }

    /// builder
    #[inline]
    pub fn max_buffer_parts(mut self, parts: u64) -> Self {
        self.max_buffer_parts = parts;
        self
    }

    /// builder
    #[inline]
    pub fn max_image_parts(mut self, parts: u64) -> Self {
        self.max_image_parts = parts;
        self
    }

    /// builder
    #[inline]
    pub fn ring_buffer_size(mut self, size: usize) -> Self {
        self.ring_buffer_size = size;
        self
    }
}
