use alloc::{boxed::Box, sync::Arc};
use core::{
    alloc::Layout,
    ffi::CStr,
    fmt, mem,
    ops::Deref,
};

use crate::{
    allocator::{HeapAllocator, StorageAllocator},
    error::{BufferError, Result},
};

/// `Debug` 输出中内容预览的最大字节数。
const DEBUG_PREVIEW: usize = 32;

/// `RecordRecycler` 描述宿主记录在释放时的回收入口。
///
/// # 设计初衷（Why）
/// - 缓冲记录本身可能由构造函数放在堆上，也可能由池统一管理；
///   释放时“存储归还分配器”之后，记录本身的去向需要一个显式的钩子。
/// - 与池解耦：缓冲只知道“把记录交给回收器”，不关心回收器是直接丢弃还是放回自由链表。
///
/// # 契约定义（What）
/// - `reclaim` 收到的记录已处于 Empty 状态（存储已归还），`host` 已被置为 [`HostRelease::Embedded`]；
/// - **前置条件**：实现必须线程安全，且不得 panic，否则释放路径上的 panic 会中止调用方流程。
pub trait RecordRecycler: Send + Sync + 'static {
    /// 接收一条已清空存储的缓冲记录。
    fn reclaim(&self, record: Box<Buffer>);
}

/// 宿主记录的释放策略。
///
/// - `Embedded`：记录由持有者内嵌或放在栈上，释放只归还存储；
/// - `Heap`：记录由 [`Buffer::new`] 放在堆上，释放时连同记录一起回收；
/// - `Recycle`：记录来自池，释放时交给 [`RecordRecycler`]。
pub enum HostRelease {
    Embedded,
    Heap,
    Recycle(Arc<dyn RecordRecycler>),
}

impl fmt::Debug for HostRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRelease::Embedded => f.write_str("Embedded"),
            HostRelease::Heap => f.write_str("Heap"),
            HostRelease::Recycle(_) => f.write_str("Recycle(..)"),
        }
    }
}

/// 缓冲当前的可观测状态。
///
/// - `Empty`：未持有存储，`size == capacity == 0`；
/// - `Allocated`：持有存储，`capacity > 0` 且 `size <= capacity`。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferState {
    Empty,
    Allocated,
}

/// `Buffer` 是按固定单位扩容的连续字节缓冲。
///
/// # 设计动机（Why）
/// - 渲染流水线需要在大量小片段追加时避免逐次重新分配；
///   容量总是以 `unit` 为步长增长，重新分配的节奏可预测，且容量始终与单位对齐。
/// - 分配来源通过 [`StorageAllocator`] 注入，宿主记录的去向通过 [`HostRelease`] 显式标注，
///   两条生命周期路径都能被穷尽处理。
///
/// # 架构关系（How）
/// - `storage` 为 `None` 时处于 Empty 状态；`capacity` 记录按单位步进后的逻辑容量，
///   分配器可以给出更长的存储，但缓冲只使用前 `capacity` 字节；
/// - `[0, size)` 是有效内容，`[size, capacity)` 内容未定义，
///   仅在 [`Buffer::as_cstr`] 之后保证 `size` 处为零字节。
///
/// # 契约说明（What）
/// - **前置条件**：所有变更操作都要求 `unit > 0`，否则视为编程错误，调试构建下由断言捕获；
/// - **后置条件**：任一公开操作返回后 `capacity >= size`，容量从不隐式收缩；
/// - **失败语义**：不可失败路径上分配器耗尽即终止进程；需要传播错误的调用方使用 `try_*` 变体。
///
/// # 风险与取舍（Trade-offs）
/// - [`Buffer::set`] 缩短内容时不清理旧尾部字节，它们只是“越过 `size` 的未定义字节”；
///   调用方不得依赖其为零。
pub struct Buffer {
    storage: Option<Box<[u8]>>,
    size: usize,
    capacity: usize,
    unit: usize,
    allocator: Arc<dyn StorageAllocator>,
    host: HostRelease,
}

impl Buffer {
    /// 在堆上构造缓冲记录，使用默认堆分配器，释放时连同记录一起回收。
    ///
    /// # 前置条件
    /// - `unit > 0`；为 0 时构造本身成功，但任何变更操作都会触发断言。
    ///
    /// # 后置条件
    /// - 返回的记录处于 Empty 状态，不预先分配存储。
    pub fn new(unit: usize) -> Box<Self> {
        Box::new(Self::init(unit, Arc::new(HeapAllocator), HostRelease::Heap))
    }

    /// 构造由持有者内嵌的缓冲，使用默认堆分配器。
    pub fn embedded(unit: usize) -> Self {
        Self::init(unit, Arc::new(HeapAllocator), HostRelease::Embedded)
    }

    /// 以给定策略初始化缓冲字段，不分配存储。
    pub fn init(unit: usize, allocator: Arc<dyn StorageAllocator>, host: HostRelease) -> Self {
        Self {
            storage: None,
            size: 0,
            capacity: 0,
            unit,
            allocator,
            host,
        }
    }

    /// 释放缓冲记录。
    ///
    /// # 执行逻辑（How）
    /// 1. `None` 直接返回；
    /// 2. 存储交还分配器（Empty 状态下分配器收到 `None`）；
    /// 3. 按 [`HostRelease`] 处理记录本身：`Heap`/`Embedded` 随 `Box` 一同丢弃，
    ///    `Recycle` 交给回收器，交付前 `host` 被重置为 `Embedded`，避免记录与池互相持有。
    ///
    /// 对于按值持有的缓冲，`Drop` 同样会把存储交还分配器。
    pub fn release(record: Option<Box<Self>>) {
        let Some(mut record) = record else {
            return;
        };
        record.release_storage();
        match mem::replace(&mut record.host, HostRelease::Embedded) {
            HostRelease::Recycle(recycler) => recycler.reclaim(record),
            HostRelease::Heap | HostRelease::Embedded => drop(record),
        }
    }

    /// 归还存储并回到 Empty 状态，记录本身继续可用。
    pub fn reset(&mut self) {
        self.debug_assert_initialized();
        let released = self.capacity;
        self.release_storage();
        tracing::trace!(released, "buffer reset");
    }

    /// 确保 `capacity >= target`，分配失败时终止进程。
    pub fn grow(&mut self, target: usize) {
        if let Err(err) = self.try_grow(target) {
            storage_exhausted(&err);
        }
    }

    /// 确保 `capacity >= target`。
    ///
    /// 新容量是从当前容量出发、以 `unit` 为步长（至少一步）首次达到 `target` 的值；
    /// 失败时缓冲内容与容量保持不变。
    pub fn try_grow(&mut self, target: usize) -> Result<()> {
        self.debug_assert_initialized();
        if self.capacity >= target {
            return Ok(());
        }
        let next = next_capacity(self.capacity, self.unit, target)?;
        self.allocator.reallocate(&mut self.storage, next)?;
        if self.storage.as_deref().map_or(0, <[u8]>::len) < next {
            return Err(BufferError::AllocationFailed { requested: next });
        }
        tracing::trace!(from = self.capacity, to = next, unit = self.unit, "buffer grown");
        self.capacity = next;
        Ok(())
    }

    /// 追加字节。
    pub fn put(&mut self, bytes: &[u8]) {
        if let Err(err) = self.try_put(bytes) {
            storage_exhausted(&err);
        }
    }

    /// 追加字节，分配失败时返回错误且内容不变。
    pub fn try_put(&mut self, bytes: &[u8]) -> Result<()> {
        self.debug_assert_initialized();
        let start = self.size;
        let end = start
            .checked_add(bytes.len())
            .ok_or(BufferError::CapacityOverflow {
                capacity: self.capacity,
                requested: usize::MAX,
            })?;
        if end > self.capacity {
            self.try_grow(end)?;
        }
        self.live_storage_mut()[start..end].copy_from_slice(bytes);
        self.size = end;
        Ok(())
    }

    /// 追加字符串的字节，不附带终止符。
    pub fn put_str(&mut self, text: &str) {
        self.put(text.as_bytes());
    }

    /// 追加单个字节。
    pub fn put_byte(&mut self, byte: u8) {
        self.debug_assert_initialized();
        let at = self.size;
        if at >= self.capacity {
            self.grow(at + 1);
        }
        self.live_storage_mut()[at] = byte;
        self.size = at + 1;
    }

    /// 以 `bytes` 覆盖内容，`size` 变为 `bytes.len()`；新长度之后的旧字节不做清理。
    pub fn set(&mut self, bytes: &[u8]) {
        self.debug_assert_initialized();
        if bytes.len() > self.capacity {
            self.grow(bytes.len());
        }
        self.live_storage_mut()[..bytes.len()].copy_from_slice(bytes);
        self.size = bytes.len();
    }

    /// 以字符串覆盖内容。
    pub fn set_str(&mut self, text: &str) {
        self.set(text.as_bytes());
    }

    /// 内容与 `bytes` 长度一致且逐字节相同。
    pub fn eq_bytes(&self, bytes: &[u8]) -> bool {
        self.as_slice() == bytes
    }

    /// 内容与字符串的字节逐一相同。
    pub fn eq_str(&self, text: &str) -> bool {
        self.eq_bytes(text.as_bytes())
    }

    /// 以比较器形式检查内容是否为 `candidate` 的前缀。
    ///
    /// # 契约（What）
    /// - 返回 0：内容的每个字节都与 `candidate` 同位置字节相同，且 `candidate` 不短于内容；
    /// - 返回正数：`candidate` 在内容结束前就已耗尽；
    /// - 其它：首个不同字节对的差值 `content[i] - candidate[i]`，符号表达先后顺序。
    pub fn prefix_cmp(&self, candidate: &[u8]) -> i32 {
        self.debug_assert_initialized();
        for (i, &byte) in self.as_slice().iter().enumerate() {
            match candidate.get(i) {
                None => return i32::from(byte).max(1),
                Some(&expected) if expected != byte => {
                    return i32::from(byte) - i32::from(expected);
                }
                Some(_) => {}
            }
        }
        0
    }

    /// 内容是否为 `candidate` 的前缀（或与之相等）。
    pub fn is_prefix_of(&self, candidate: &[u8]) -> bool {
        self.prefix_cmp(candidate) == 0
    }

    /// 丢弃前 `n` 字节，剩余内容前移且保持顺序。
    pub fn consume(&mut self, n: usize) {
        self.debug_assert_initialized();
        if n >= self.size {
            self.size = 0;
            return;
        }
        let size = self.size;
        self.live_storage_mut().copy_within(n..size, 0);
        self.size = size - n;
    }

    /// 返回以零结尾的只读视图。
    ///
    /// # 执行逻辑（How）
    /// - 若 `size` 处恰好已有零字节且位于容量之内，直接复用，不做任何修改；
    /// - 否则扩容到至少 `size + 1`，在 `size` 处写入零；`size` 不变，终止符不计入内容。
    ///
    /// 视图在下一次变更操作后失效；与 C 字符串一致，视图止于第一个零字节。
    pub fn as_cstr(&mut self) -> &CStr {
        self.debug_assert_initialized();
        let size = self.size;
        let terminated =
            size < self.capacity && self.storage.as_deref().is_some_and(|bytes| bytes[size] == 0);
        if !terminated {
            self.grow(size + 1);
            self.live_storage_mut()[size] = 0;
        }
        let bytes = self.storage.as_deref().unwrap_or_default();
        CStr::from_bytes_until_nul(&bytes[..=size]).unwrap_or_default()
    }

    /// 追加格式化结果。
    ///
    /// # 执行逻辑（How）
    /// 1. 确保尾部至少有 1 字节空闲；
    /// 2. 先直接格式化到尾部空间，同时统计完整输出所需长度；
    /// 3. 若所需长度超出尾部空间，扩容到 `size + 所需长度` 后再格式化且仅再格式化一次。
    ///
    /// # 契约（What）
    /// - 格式化实现返回 [`fmt::Error`] 时视为编码错误：不追加任何字节，`size` 不变，也不向调用方报错；
    /// - 第二次格式化仍放不下（输出不稳定的 `Display` 实现）时同样回滚为零字节追加；
    /// - 成功时 `size` 恰好前进实际写入的字节数。
    pub fn format_append(&mut self, args: fmt::Arguments<'_>) {
        self.debug_assert_initialized();
        if self.size >= self.capacity {
            self.grow(self.size + 1);
        }
        let Some(mut required) = self.render_into_tail(args) else {
            return;
        };
        if required > self.capacity - self.size {
            self.grow(self.size.saturating_add(required));
            match self.render_into_tail(args) {
                Some(written) if written <= self.capacity - self.size => required = written,
                _ => {
                    tracing::warn!(
                        size = self.size,
                        capacity = self.capacity,
                        "formatted output changed between passes, nothing appended"
                    );
                    return;
                }
            }
        }
        self.size += required;
    }

    /// 有效内容。
    pub fn as_slice(&self) -> &[u8] {
        match self.storage.as_deref() {
            Some(bytes) => &bytes[..self.size],
            None => &[],
        }
    }

    /// 有效内容的字节数。
    pub fn len(&self) -> usize {
        self.size
    }

    /// 是否没有有效内容（不代表没有存储）。
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 当前按单位对齐的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 扩容单位。
    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn state(&self) -> BufferState {
        if self.storage.is_some() {
            BufferState::Allocated
        } else {
            BufferState::Empty
        }
    }

    /// 宿主记录的释放策略。
    pub fn host(&self) -> &HostRelease {
        &self.host
    }

    pub(crate) fn set_host(&mut self, host: HostRelease) {
        self.host = host;
    }

    /// 前 `capacity` 字节的可写视图。
    pub(crate) fn live_storage_mut(&mut self) -> &mut [u8] {
        let capacity = self.capacity;
        match self.storage.as_deref_mut() {
            Some(bytes) => &mut bytes[..capacity],
            None => &mut [],
        }
    }

    /// 提交已直接写入 `[size, size + cnt)` 的字节。
    pub(crate) fn advance_size(&mut self, cnt: usize) {
        debug_assert!(self.size + cnt <= self.capacity);
        self.size += cnt;
    }

    fn release_storage(&mut self) {
        self.allocator.release(self.storage.take());
        self.size = 0;
        self.capacity = 0;
    }

    /// 格式化到 `[size, capacity)`，返回完整输出所需字节数；格式化失败返回 `None`。
    fn render_into_tail(&mut self, args: fmt::Arguments<'_>) -> Option<usize> {
        let start = self.size;
        let mut writer = TailWriter {
            dst: &mut self.live_storage_mut()[start..],
            required: 0,
        };
        fmt::write(&mut writer, args).ok().map(|()| writer.required)
    }

    fn debug_assert_initialized(&self) {
        debug_assert!(self.unit > 0, "Buffer 未初始化：扩容单位为 0");
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // `release`/`reset` 之后存储已归还，不再重复通知分配器。
        if self.storage.is_some() {
            self.release_storage();
        }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq<[u8]> for Buffer {
    fn eq(&self, other: &[u8]) -> bool {
        self.eq_bytes(other)
    }
}

impl PartialEq<str> for Buffer {
    fn eq(&self, other: &str) -> bool {
        self.eq_str(other)
    }
}

impl PartialEq<&str> for Buffer {
    fn eq(&self, other: &&str) -> bool {
        self.eq_str(other)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = self.as_slice();
        let preview = &content[..content.len().min(DEBUG_PREVIEW)];
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("unit", &self.unit)
            .field("state", &self.state())
            .field("host", &self.host)
            .field("preview", &format_args!("\"{}\"", preview.escape_ascii()))
            .finish()
    }
}

/// 逐段追加，格式化实现报错时已写入的片段会保留；需要整体回滚语义时使用 [`Buffer::format_append`]。
impl fmt::Write for Buffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put_str(s);
        Ok(())
    }
}

/// 写入尾部空间并统计所需长度，放不下的部分只计数不写入。
struct TailWriter<'a> {
    dst: &'a mut [u8],
    required: usize,
}

impl fmt::Write for TailWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let start = self.required;
        if start < self.dst.len() {
            let n = bytes.len().min(self.dst.len() - start);
            self.dst[start..start + n].copy_from_slice(&bytes[..n]);
        }
        self.required = self.required.saturating_add(bytes.len());
        Ok(())
    }
}

/// 从 `capacity` 出发以 `unit` 为步长，找到首个不小于 `target` 的容量（至少一步）。
fn next_capacity(capacity: usize, unit: usize, target: usize) -> Result<usize> {
    let steps = (target - capacity).div_ceil(unit);
    steps
        .checked_mul(unit)
        .and_then(|increment| capacity.checked_add(increment))
        .ok_or(BufferError::CapacityOverflow {
            capacity,
            requested: target,
        })
}

/// 不可失败路径上的分配失败：记录后终止。
#[cold]
fn storage_exhausted(err: &BufferError) -> ! {
    tracing::error!(error = %err, "buffer storage exhausted");
    match err {
        BufferError::AllocationFailed { requested } => match Layout::array::<u8>(*requested) {
            Ok(layout) => alloc::alloc::handle_alloc_error(layout),
            Err(_) => panic!("{err}"),
        },
        _ => panic!("{err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::{cell::Cell, fmt::Write as _};
    use spin::Mutex;
    use tracing_test::traced_test;

    #[test]
    fn next_capacity_steps_by_unit() {
        assert_eq!(next_capacity(0, 8, 1), Ok(8));
        assert_eq!(next_capacity(0, 8, 8), Ok(8));
        assert_eq!(next_capacity(0, 8, 9), Ok(16));
        assert_eq!(next_capacity(16, 8, 17), Ok(24));
        assert_eq!(next_capacity(16, 8, 40), Ok(40));
        assert_eq!(next_capacity(16, 8, 41), Ok(48));
        assert_eq!(
            next_capacity(8, 8, usize::MAX),
            Err(BufferError::CapacityOverflow {
                capacity: 8,
                requested: usize::MAX
            })
        );
    }

    #[test]
    fn grow_is_noop_when_capacity_suffices() {
        let mut buf = Buffer::embedded(16);
        buf.grow(10);
        assert_eq!(buf.capacity(), 16);
        buf.grow(16);
        buf.grow(0);
        assert_eq!(buf.capacity(), 16);
        buf.grow(17);
        assert_eq!(buf.capacity(), 32);
    }

    #[test]
    fn put_byte_grows_one_unit_at_a_time() {
        let mut buf = Buffer::embedded(4);
        for byte in b"hello" {
            buf.put_byte(*byte);
        }
        assert_eq!(buf.as_slice(), b"hello");
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn set_leaves_stale_tail_outside_content() {
        let mut buf = Buffer::embedded(8);
        buf.put_str("abcdef");
        buf.set_str("xy");
        assert_eq!(buf.as_slice(), b"xy");
        assert_eq!(&buf.live_storage_mut()[2..6], b"cdef");
    }

    #[test]
    fn as_cstr_reuses_existing_terminator() {
        let mut buf = Buffer::embedded(8);
        buf.put_str("abc");
        buf.live_storage_mut()[3] = 0;
        let capacity = buf.capacity();
        assert_eq!(buf.as_cstr().to_bytes(), b"abc");
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn as_cstr_grows_when_content_fills_capacity() {
        let mut buf = Buffer::embedded(4);
        buf.put_str("abcd");
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.as_cstr().to_bytes_with_nul(), b"abcd\0");
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn as_cstr_on_empty_buffer_allocates_terminator() {
        let mut buf = Buffer::embedded(8);
        assert_eq!(buf.as_cstr().to_bytes(), b"");
        assert_eq!(buf.state(), BufferState::Allocated);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn format_append_rerenders_after_growth() {
        let mut buf = Buffer::embedded(4);
        buf.put_str("n=");
        buf.format_append(format_args!("{:>10}|", 7));
        assert_eq!(buf.as_slice(), b"n=         7|");
        assert_eq!(buf.capacity() % 4, 0);
    }

    struct Failing;

    impl fmt::Display for Failing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("partial")?;
            Err(fmt::Error)
        }
    }

    #[test]
    fn format_append_treats_formatting_error_as_noop() {
        let mut buf = Buffer::embedded(8);
        buf.put_str("keep");
        buf.format_append(format_args!("{}{}", "x", Failing));
        assert_eq!(buf.as_slice(), b"keep");
    }

    /// 每次渲染输出都变长，模拟不稳定的 `Display` 实现。
    struct Unstable(Cell<usize>);

    impl fmt::Display for Unstable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let calls = self.0.get() + 1;
            self.0.set(calls);
            for _ in 0..(calls * 16) {
                f.write_str("z")?;
            }
            Ok(())
        }
    }

    #[test]
    #[traced_test]
    fn format_append_rolls_back_unstable_output() {
        let mut buf = Buffer::embedded(4);
        buf.put_str("ab");
        buf.format_append(format_args!("{}", Unstable(Cell::new(0))));
        assert_eq!(buf.as_slice(), b"ab");
        assert!(buf.capacity() >= 18);
        assert!(logs_contain("formatted output changed between passes"));
    }

    #[test]
    #[traced_test]
    fn growth_is_traced() {
        let mut buf = Buffer::embedded(8);
        buf.put_str("0123456789");
        assert!(logs_contain("buffer grown"));
    }

    #[test]
    fn fmt_write_appends_pieces() {
        let mut buf = Buffer::embedded(2);
        write!(buf, "{}:{}", "k", 10).expect("写入缓冲不会失败");
        assert_eq!(buf.as_slice(), b"k:10");
    }

    #[test]
    fn debug_shows_escaped_preview() {
        let mut buf = Buffer::embedded(8);
        buf.put(b"a\nb");
        let text = alloc::format!("{buf:?}");
        assert!(text.contains("size: 3"));
        assert!(text.contains(r#"preview: "a\nb""#));
        assert!(text.contains("host: Embedded"));
    }

    /// 记录回收事件的探针。
    #[derive(Default)]
    struct RecordingRecycler {
        units: Mutex<Vec<(usize, BufferState)>>,
    }

    impl RecordRecycler for RecordingRecycler {
        fn reclaim(&self, record: Box<Buffer>) {
            self.units.lock().push((record.unit(), record.state()));
        }
    }

    #[test]
    fn release_hands_emptied_record_to_recycler() {
        let recycler = Arc::new(RecordingRecycler::default());
        let mut record = Box::new(Buffer::init(
            32,
            Arc::new(HeapAllocator),
            HostRelease::Recycle(recycler.clone()),
        ));
        record.put_str("payload");
        Buffer::release(Some(record));
        assert_eq!(*recycler.units.lock(), [(32, BufferState::Empty)]);
    }

    #[test]
    fn release_of_absent_record_is_noop() {
        Buffer::release(None);
    }
}
