//! 存储分配策略。
//!
//! # 模块定位（Why）
//! - 缓冲本身不关心内存从哪里来：默认走全局堆，测试与嵌入方可以注入统计型、配额型分配器。
//! - 将“重新分配”与“释放”两个能力收敛到 [`StorageAllocator`] trait，
//!   以 `Arc<dyn StorageAllocator>` 形式注入缓冲，避免全局状态与编译期耦合。
//!
//! # 契约（What）
//! - `reallocate`：给定现有存储（可能缺省）与目标容量，使存储长度至少为目标容量，
//!   且保留原有字节；失败时必须保持原存储不变并返回 [`BufferError::AllocationFailed`]。
//! - `release`：归还存储；传入 `None` 必须是无操作。

use alloc::{boxed::Box, vec::Vec};

use crate::error::{BufferError, Result};

/// 缓冲的可插拔存储分配策略。
///
/// # 教案式说明
/// - **意图 (Why)**：与 `BufferRecycler` 一样把生命周期钩子显式化，
///   让缓冲与具体内存来源松耦合。
/// - **契约 (What)**：
///   - 实现需线程安全（`Send + Sync`），策略本身被视作无共享可变状态的纯函数；
///   - `reallocate` 成功后 `storage` 必为 `Some` 且长度 `>= new_capacity`，
///     原有前缀字节保持不变；多出的尾部字节内容不作要求；
///   - 失败时不得丢弃或截断 `storage` 中的数据。
pub trait StorageAllocator: Send + Sync + 'static {
    /// 将 `storage` 扩展到至少 `new_capacity` 字节。
    fn reallocate(&self, storage: &mut Option<Box<[u8]>>, new_capacity: usize) -> Result<()>;

    /// 归还存储，`None` 视为无操作。
    fn release(&self, storage: Option<Box<[u8]>>);
}

/// 默认的全局堆分配策略。
///
/// 通过 `Vec::try_reserve_exact` 申请恰好的增量，保证分配失败时原数据仍然完好；
/// 新增的容量以零填充。
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl StorageAllocator for HeapAllocator {
    fn reallocate(&self, storage: &mut Option<Box<[u8]>>, new_capacity: usize) -> Result<()> {
        let present = storage.is_some();
        let mut bytes: Vec<u8> = storage.take().map(Vec::from).unwrap_or_default();
        if bytes.len() >= new_capacity {
            *storage = Some(bytes.into_boxed_slice());
            return Ok(());
        }
        let additional = new_capacity - bytes.len();
        if bytes.try_reserve_exact(additional).is_err() {
            if present {
                *storage = Some(bytes.into_boxed_slice());
            }
            return Err(BufferError::AllocationFailed {
                requested: new_capacity,
            });
        }
        bytes.resize(new_capacity, 0);
        *storage = Some(bytes.into_boxed_slice());
        Ok(())
    }

    fn release(&self, storage: Option<Box<[u8]>>) {
        drop(storage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reallocate_preserves_prefix_and_reaches_capacity() {
        let alloc = HeapAllocator;
        let mut storage = None;
        alloc.reallocate(&mut storage, 4).expect("首次分配");
        storage.as_mut().expect("已分配")[..3].copy_from_slice(b"abc");
        alloc.reallocate(&mut storage, 12).expect("扩容");
        let bytes = storage.as_deref().expect("已分配");
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..3], b"abc");
    }

    #[test]
    fn reallocate_never_shrinks() {
        let alloc = HeapAllocator;
        let mut storage = Some(Box::from(&b"abcdef"[..]));
        alloc.reallocate(&mut storage, 2).expect("无需扩容");
        assert_eq!(storage.as_deref(), Some(&b"abcdef"[..]));
    }

    #[test]
    fn failed_reallocation_keeps_existing_bytes() {
        let alloc = HeapAllocator;
        let mut storage = Some(Box::from(&b"keep"[..]));
        let err = alloc
            .reallocate(&mut storage, usize::MAX)
            .expect_err("不可能满足的容量");
        assert_eq!(
            err,
            BufferError::AllocationFailed {
                requested: usize::MAX
            }
        );
        assert_eq!(storage.as_deref(), Some(&b"keep"[..]));
    }

    #[test]
    fn release_accepts_absent_storage() {
        HeapAllocator.release(None);
        HeapAllocator.release(Some(Box::from(&b"x"[..])));
    }
}
