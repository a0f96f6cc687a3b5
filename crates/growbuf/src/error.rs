//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 缓冲核心几乎所有操作都是全函数，唯一的运行期失败来自“拿不到存储”；
//!   配置层则需要报告非法的扩容单位与无法解析的配置文本。
//! - 将两类失败集中在 [`BufferError`] 中，`try_*` 路径可直接 `?` 传播，
//!   不可失败路径则在记录日志后走分配失败的终止流程。
//!
//! ## 设计要求（What）
//! - 派生 `thiserror::Error`，在 `no_std` 下落到 `core::error::Error`；
//! - 变体只携带 `usize`/`String` 上下文，满足 `Send + Sync + 'static`。

use alloc::string::String;

use thiserror::Error;

/// `growbuf` 的统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“分配器耗尽”“容量计算溢出”“配置非法”三类来源，
///   便于上层决定是终止进程还是拒绝配置。
/// - **契约 (What)**：格式化串错误不在此列，它们按静默追加零字节处理，永远不会返回给调用方。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BufferError {
    /// 分配器无法提供所需容量。
    #[error("storage allocation of {requested} bytes failed")]
    AllocationFailed { requested: usize },

    /// 按扩容单位步进后的容量超出 `usize` 表示范围。
    #[error("growing capacity {capacity} to reach {requested} bytes overflows usize")]
    CapacityOverflow { capacity: usize, requested: usize },

    /// 扩容单位为 0，缓冲处于未初始化的退化状态。
    #[error("growth unit must be greater than zero")]
    ZeroGrowthUnit,

    /// 配置文本无法解析。
    #[error("invalid buffer configuration: {detail}")]
    InvalidConfig { detail: String },
}

/// crate 内统一使用的结果别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;
