/// 以 `format_args!` 语法向缓冲追加格式化结果，等价于 [`Buffer::format_append`](crate::Buffer::format_append)。
///
/// ```
/// use growbuf::{Buffer, bufprintf};
///
/// let mut buf = Buffer::embedded(8);
/// bufprintf!(buf, "{}-{}", 42, "ok");
/// assert_eq!(buf.as_slice(), b"42-ok");
/// ```
#[macro_export]
macro_rules! bufprintf {
    ($buf:expr, $($arg:tt)*) => {
        $buf.format_append(::core::format_args!($($arg)*))
    };
}
