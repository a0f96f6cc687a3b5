//! 与 `bytes` / `std::io` 生态的衔接。
//!
//! # 模块定位（Why）
//! - 编解码器习惯面向 [`BufMut`] 写入；让 [`Buffer`] 直接实现该 trait，
//!   调用方无需先写入临时 `BytesMut` 再整体拷贝。
//! - 渲染结果需要交给下游零拷贝传输时，通过 [`Buffer::to_bytes`] 生成不可变快照。
//!
//! # 设计要点（How）
//! - `chunk_mut` 在尾部没有空闲时按单位扩容一步，与其它追加路径共享同一扩容策略；
//! - 这是 crate 内唯一需要 `unsafe` 的位置，见 `BufMut` 实现上的说明。

use bytes::{BufMut, Bytes, buf::UninitSlice};

use crate::buffer::Buffer;

impl Buffer {
    /// 复制当前内容为不可变 `Bytes` 快照。
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }
}

/// `BufMut` 实现的安全性说明：
///
/// - 存储在分配时已全部初始化（默认分配器零填充，自定义分配器返回 `Box<[u8]>`），
///   因此 `chunk_mut` 暴露的区域从不含未初始化内存；
/// - `advance_mut` 断言推进量不超过 `[size, capacity)`，保证 `size <= capacity` 不变式。
#[allow(unsafe_code)]
unsafe impl BufMut for Buffer {
    fn remaining_mut(&self) -> usize {
        isize::MAX as usize - self.len()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        let spare = self.capacity() - self.len();
        assert!(
            cnt <= spare,
            "Buffer::advance_mut 超出剩余可写空间：请求 {cnt}，实际 {spare}"
        );
        self.advance_size(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        let start = self.len();
        if start == self.capacity() {
            self.grow(start + 1);
        }
        UninitSlice::new(&mut self.live_storage_mut()[start..])
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.put(src);
    }
}

#[cfg(feature = "std")]
impl std::io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.put(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.put(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
