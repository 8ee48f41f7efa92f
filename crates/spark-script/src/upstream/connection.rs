//! # connection：单条上游连接的状态
//!
//! ## 状态机（What）
//! `Unconnected → Resolving → Connecting → Connected → (Sending | Receiving)* → 关闭`，
//! 任意阶段的硬错误或超时转入 `Failed`；关闭即从请求上下文中移除连接。
//!
//! ## 续体（How）
//! - 读写方向各登记一个续体；事件到达时桥接层只运行当前续体；
//! - `Dummy` 续体表示“没有待完成的操作”，事件到达时什么也不做；
//! - 连接成功、发送排空、接收结束后都会回到 `Dummy`。

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;

use crate::config::SocketConfig;
use crate::error::ScriptError;
use crate::host::ResolveTicket;
use crate::status::IoStatus;
use crate::upstream::buffer::{RecvBuffer, SendChain};
use crate::upstream::transport::Transport;

/// 连接状态。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ConnState {
    #[default]
    Unconnected,
    Resolving,
    Connecting,
    Connected,
    Sending,
    Receiving,
    Failed,
}

impl ConnState {
    /// 是否持有已建立的传输。
    pub fn is_established(self) -> bool {
        matches!(
            self,
            ConnState::Connected | ConnState::Sending | ConnState::Receiving
        )
    }
}

/// 读方向的续体。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReadContinuation {
    #[default]
    Dummy,
    Recv,
    RecvSync,
}

/// 写方向的续体。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WriteContinuation {
    #[default]
    Dummy,
    Connected,
    Send,
}

/// 单方向的就绪状态。
///
/// `ready` 在事件到达时置位、在遇到 `WouldBlock` 时清除；`active` 表示该方向已向宿主登记兴趣。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Readiness {
    pub ready: bool,
    pub active: bool,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            ready: true,
            active: false,
        }
    }
}

/// 三类操作超时。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    pub fn from_config(config: &SocketConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            read: config.read_timeout(),
            write: config.write_timeout(),
        }
    }
}

/// `recv_sync` 的完成条件。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecvLimit {
    /// 读到对端有序关闭为止。
    ToEof,
    /// 恰好读满 `n` 个字节。
    Exactly(usize),
}

#[derive(Debug)]
pub(crate) struct RecvSyncState {
    pub(crate) limit: RecvLimit,
    pub(crate) acc: BytesMut,
}

impl RecvSyncState {
    pub(crate) fn new(limit: RecvLimit) -> Self {
        Self {
            limit,
            acc: BytesMut::new(),
        }
    }

    /// 本次最多还应读取的字节数。
    pub(crate) fn want(&self, buffer_size: usize) -> usize {
        match self.limit {
            RecvLimit::ToEof => buffer_size,
            RecvLimit::Exactly(n) => n.saturating_sub(self.acc.len()).min(buffer_size),
        }
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        matches!(self.limit, RecvLimit::Exactly(n) if self.acc.len() >= n)
    }
}

/// 单条上游连接。
pub struct UpstreamConnection {
    pub(crate) target: String,
    pub(crate) port: u16,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) state: ConnState,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) timeouts: Timeouts,
    pub(crate) recv_buf: RecvBuffer,
    pub(crate) send_chain: SendChain,
    pub(crate) read: Readiness,
    pub(crate) write: Readiness,
    pub(crate) read_handler: ReadContinuation,
    pub(crate) write_handler: WriteContinuation,
    pub(crate) resolve: Option<ResolveTicket>,
    pub(crate) connect_status: IoStatus,
    pub(crate) send_status: IoStatus,
    pub(crate) last_error: Option<ScriptError>,
    pub(crate) sync: Option<RecvSyncState>,
}

impl UpstreamConnection {
    pub(crate) fn new(target: impl Into<String>, port: u16, timeouts: Timeouts) -> Self {
        Self {
            target: target.into(),
            port,
            peer: None,
            state: ConnState::Unconnected,
            transport: None,
            timeouts,
            recv_buf: RecvBuffer::default(),
            send_chain: SendChain::default(),
            read: Readiness::default(),
            write: Readiness::default(),
            read_handler: ReadContinuation::Dummy,
            write_handler: WriteContinuation::Dummy,
            resolve: None,
            connect_status: IoStatus::Again,
            send_status: IoStatus::Ok,
            last_error: None,
            sync: None,
        }
    }

    /// 脚本传入的原始目标文本。
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 连接所用端口（目标自带端口优先）。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 解析完成后的对端地址。
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn connect_status(&self) -> IoStatus {
        self.connect_status
    }

    pub fn send_status(&self) -> IoStatus {
        self.send_status
    }

    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    pub fn pending_send(&self) -> usize {
        self.send_chain.pending()
    }

    pub fn read_continuation(&self) -> ReadContinuation {
        self.read_handler
    }

    pub fn write_continuation(&self) -> WriteContinuation {
        self.write_handler
    }

    pub fn recv_buffer(&self) -> &RecvBuffer {
        &self.recv_buf
    }

    /// 没有进行中的操作、可以归还给对端池。
    pub(crate) fn is_idle(&self) -> bool {
        self.state == ConnState::Connected && self.send_chain.is_empty() && !self.read.active
    }

    /// 两个方向都换成空续体。
    pub(crate) fn install_dummy_handlers(&mut self) {
        self.read_handler = ReadContinuation::Dummy;
        self.write_handler = WriteContinuation::Dummy;
        self.read.active = false;
        self.write.active = false;
    }

    pub(crate) fn fail(&mut self, error: ScriptError) {
        self.state = ConnState::Failed;
        self.last_error = Some(error);
    }
}

impl fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("target", &self.target)
            .field("port", &self.port)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("read_handler", &self.read_handler)
            .field("write_handler", &self.write_handler)
            .field("pending_send", &self.send_chain.pending())
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}
