use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
};

use spin::Mutex;

use crate::{
    allocator::{HeapAllocator, StorageAllocator},
    buffer::{Buffer, BufferState, HostRelease, RecordRecycler},
};

/// `RecordPool` 复用缓冲宿主记录，服务于按嵌套层级租借工作缓冲的渲染流程。
///
/// # 模块角色（Why）
/// - 渲染器每进入一层块级/行内结构都需要一块临时缓冲，结束时归还；
///   池化宿主记录可以避免反复分配 `Box<Buffer>`。
/// - 借助 [`HostRelease::Recycle`]，调用方只需 [`Buffer::release`]，
///   记录就会回到池中，无需关心回收细节。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<Box<Buffer>>>` 作为自由链表，租借时优先弹出空闲记录；
/// - `PoolMetrics` 以原子计数跟踪活跃租约、累计租借/回收、未命中与丢弃次数，
///   支撑 [`RecordPool::stats`] 快照；
/// - 回收时存储已由缓冲交还分配器，池里只保留 Empty 记录。
///
/// # 契约说明（What）
/// - [`RecordPool::acquire`] 返回的记录总是 Empty 状态，扩容单位等于池的单位；
/// - 自由链表长度不超过 `max_cached`，超出部分直接丢弃并计入 `dropped`；
/// - 记录在池中时 `host` 为 `Embedded`，只有租出期间才持有指向池的 `Arc`，
///   因此池与记录之间不存在引用环。
///
/// # 设计权衡（Trade-offs）
/// - 使用自旋锁而非 `std::sync::Mutex`，以便在 `no_std + alloc` 环境中仍能工作；
/// - 未经 [`Buffer::release`] 而直接丢弃的租出记录不会回到池中，只会让 `active` 偏大。
#[derive(Clone)]
pub struct RecordPool {
    inner: Arc<PoolInner>,
}

/// 池统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// 当前租出未归还的记录数。
    pub active: usize,
    /// 累计租借次数。
    pub total_acquired: usize,
    /// 累计归还次数。
    pub total_recycled: usize,
    /// 自由链表为空、需要新建记录的次数。
    pub misses: usize,
    /// 自由链表中的空闲记录数。
    pub cached: usize,
    /// 因超过缓存上限而丢弃的归还记录数。
    pub dropped: usize,
}

impl RecordPool {
    /// 创建使用默认堆分配器的池。
    pub fn new(unit: NonZeroUsize, max_cached: usize) -> Self {
        Self::with_allocator(unit, max_cached, Arc::new(HeapAllocator))
    }

    /// 创建池，新建记录共享给定的存储分配器。
    pub fn with_allocator(
        unit: NonZeroUsize,
        max_cached: usize,
        allocator: Arc<dyn StorageAllocator>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                unit,
                max_cached,
                allocator,
                free_list: Mutex::new(Vec::new()),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// 租借一条 Empty 记录；用完后通过 [`Buffer::release`] 归还。
    pub fn acquire(&self) -> Box<Buffer> {
        let reused = self.inner.free_list.lock().pop();
        let mut record = match reused {
            Some(record) => record,
            None => {
                self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(unit = self.inner.unit.get(), "record pool miss");
                Box::new(Buffer::init(
                    self.inner.unit.get(),
                    Arc::clone(&self.inner.allocator),
                    HostRelease::Embedded,
                ))
            }
        };
        debug_assert_eq!(record.state(), BufferState::Empty);
        let recycler: Arc<dyn RecordRecycler> = self.inner.clone();
        record.set_host(HostRelease::Recycle(recycler));
        self.inner.metrics.acquired();
        record
    }

    /// 清空自由链表，返回被丢弃的记录数。
    pub fn shrink_to_fit(&self) -> usize {
        let released = {
            let mut list = self.inner.free_list.lock();
            let released = list.len();
            list.clear();
            released
        };
        tracing::debug!(released, "record pool shrunk");
        released
    }

    pub fn unit(&self) -> NonZeroUsize {
        self.inner.unit
    }

    pub fn stats(&self) -> PoolStats {
        let cached = self.inner.free_list.lock().len();
        let metrics = &self.inner.metrics;
        PoolStats {
            active: metrics.active.load(Ordering::Relaxed),
            total_acquired: metrics.total_acquired.load(Ordering::Relaxed),
            total_recycled: metrics.total_recycled.load(Ordering::Relaxed),
            misses: metrics.misses.load(Ordering::Relaxed),
            cached,
            dropped: metrics.dropped.load(Ordering::Relaxed),
        }
    }
}

struct PoolInner {
    unit: NonZeroUsize,
    max_cached: usize,
    allocator: Arc<dyn StorageAllocator>,
    free_list: Mutex<Vec<Box<Buffer>>>,
    metrics: PoolMetrics,
}

impl RecordRecycler for PoolInner {
    fn reclaim(&self, record: Box<Buffer>) {
        self.metrics.recycled();
        debug_assert_eq!(record.state(), BufferState::Empty);
        let mut list = self.free_list.lock();
        if list.len() < self.max_cached {
            list.push(record);
        } else {
            drop(list);
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    active: AtomicUsize,
    total_acquired: AtomicUsize,
    total_recycled: AtomicUsize,
    misses: AtomicUsize,
    dropped: AtomicUsize,
}

impl PoolMetrics {
    fn acquired(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
    }

    fn recycled(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
                Some(prev.saturating_sub(1))
            });
        self.total_recycled.fetch_add(1, Ordering::Relaxed);
    }
}
