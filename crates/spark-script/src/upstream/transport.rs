//! 宿主提供的传输句柄契约。
//!
//! 所有方法都是非阻塞的：无法立即完成时返回 `io::ErrorKind::WouldBlock`，由调用方登记兴趣后等待事件。

use std::fmt;
use std::io;

/// 非阻塞连接的进度。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectProgress {
    /// 连接已建立。
    Connected,
    /// 连接进行中，完成时以写就绪事件呈现。
    InProgress,
}

/// 非阻塞传输句柄。
pub trait Transport {
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// 读取到 `buf`；返回 `Ok(0)` 表示对端有序关闭。
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 读取并清除挂起的套接字错误（`SO_ERROR`），用于判定异步连接的结果。
    fn take_error(&mut self) -> io::Result<Option<io::Error>>;
}

/// 宿主 `connect` 的结果：传输句柄与连接进度。
pub struct Dialed {
    pub transport: Box<dyn Transport>,
    pub progress: ConnectProgress,
}

impl Dialed {
    pub fn new(transport: Box<dyn Transport>, progress: ConnectProgress) -> Self {
        Self {
            transport,
            progress,
        }
    }
}

impl fmt::Debug for Dialed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialed")
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
