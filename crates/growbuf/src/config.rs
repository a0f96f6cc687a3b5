//! 缓冲与记录池的配置。
//!
//! # 模块定位（Why）
//! - 扩容单位决定重新分配的节奏：块级工作缓冲以 256 字节为单位，行内片段以 64 字节为单位，
//!   最终输出缓冲同样以 64 字节为单位。将这些取值集中成预设，避免调用点散落魔法数。
//! - 宿主可以通过 TOML 片段调整单位与池容量；解析与校验在这里完成，
//!   非法的 0 单位在进入缓冲之前就被拒绝。
//!
//! # 契约（What）
//! - `validate` 成功返回 `NonZeroUsize`，失败返回 [`BufferError::ZeroGrowthUnit`]；
//! - `from_toml_str`（需 `std` 特性）把解析错误映射为 [`BufferError::InvalidConfig`]。

use alloc::boxed::Box;
use core::num::NonZeroUsize;

use serde::Deserialize;

use crate::{
    buffer::Buffer,
    error::{BufferError, Result},
    pool::RecordPool,
};

/// 记录池默认缓存的空闲记录上限。
pub const DEFAULT_MAX_CACHED: usize = 16;

/// 单个缓冲的配置。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    /// 扩容单位（字节）。
    pub unit: usize,
}

impl BufferConfig {
    /// 块级工作缓冲。
    pub const BLOCK: Self = Self { unit: 256 };
    /// 行内片段工作缓冲。
    pub const SPAN: Self = Self { unit: 64 };
    /// 最终输出缓冲。
    pub const OUTPUT: Self = Self { unit: 64 };

    pub const fn new(unit: usize) -> Self {
        Self { unit }
    }

    pub fn validate(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.unit).ok_or(BufferError::ZeroGrowthUnit)
    }

    /// 按配置在堆上构造缓冲。
    pub fn build(&self) -> Result<Box<Buffer>> {
        Ok(Buffer::new(self.validate()?.get()))
    }

    /// 按配置构造由持有者内嵌的缓冲。
    pub fn build_embedded(&self) -> Result<Buffer> {
        Ok(Buffer::embedded(self.validate()?.get()))
    }

    #[cfg(feature = "std")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        parse_toml(text)
    }
}

/// 记录池的配置。
///
/// `max_cached` 缺省为 [`DEFAULT_MAX_CACHED`]；为 0 时池不缓存任何记录，每次都重新构造。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub unit: usize,
    #[serde(default = "default_max_cached")]
    pub max_cached: usize,
}

impl PoolConfig {
    pub const fn new(unit: usize, max_cached: usize) -> Self {
        Self { unit, max_cached }
    }

    pub fn validate(&self) -> Result<NonZeroUsize> {
        BufferConfig::new(self.unit).validate()
    }

    /// 按配置构造记录池。
    pub fn build(&self) -> Result<RecordPool> {
        Ok(RecordPool::new(self.validate()?, self.max_cached))
    }

    #[cfg(feature = "std")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        parse_toml(text)
    }
}

impl From<BufferConfig> for PoolConfig {
    fn from(config: BufferConfig) -> Self {
        Self::new(config.unit, DEFAULT_MAX_CACHED)
    }
}

fn default_max_cached() -> usize {
    DEFAULT_MAX_CACHED
}

#[cfg(feature = "std")]
fn parse_toml<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    toml::from_str(text).map_err(|err| BufferError::InvalidConfig {
        detail: err.message().to_owned(),
    })
}
