#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! `growbuf` 提供文本渲染流水线使用的可增长字节缓冲。
//!
//! # 模块定位（Why）
//! - 渲染器在生成 HTML 时会进行海量的小片段追加；按固定单位扩容的 [`Buffer`]
//!   让重新分配的次数与节奏可预测，同时保持容量与单位对齐。
//! - 缓冲只存放原始字节，不解释编码、Unicode 或 markdown 语法。
//!
//! # 设计概要（How）
//! - `buffer` 模块实现 [`Buffer`] 及其全部操作：追加、覆盖、比较、前端裁剪、
//!   C 字符串物化与格式化追加；
//! - `allocator` 模块定义可插拔的 [`StorageAllocator`]，默认实现为 [`HeapAllocator`]；
//! - 宿主记录的释放策略由 [`HostRelease`] 标注，[`RecordPool`] 通过 [`RecordRecycler`]
//!   回收记录以供复用；
//! - `config` 模块提供扩容单位预设与 TOML 配置解析；`interop` 模块衔接 `bytes` 与 `std::io`。
//!
//! # 并发模型（What）
//! - 缓冲不做任何内部同步，同一时刻只允许一个持有者修改；
//! - 所有操作都是同步的，耗时只受内存分配影响；分配器耗尽在不可失败路径上直接终止进程。

extern crate alloc;

mod allocator;
mod buffer;
mod config;
mod error;
mod interop;
mod macros;
mod pool;

pub use allocator::{HeapAllocator, StorageAllocator};
pub use buffer::{Buffer, BufferState, HostRelease, RecordRecycler};
pub use config::{BufferConfig, DEFAULT_MAX_CACHED, PoolConfig};
pub use error::{BufferError, Result};
pub use pool::{PoolStats, RecordPool};
