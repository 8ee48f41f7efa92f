//! # context 模块说明
//!
//! ## 角色定位（Why）
//! - [`RequestContext`] 是一次入站请求在脚本桥接层的全部状态，由宿主流水线独占；
//! - 所有回调都显式接收上下文引用，不依赖任何进程级“当前请求”变量。
//!
//! ## 不变量（What）
//! - 同一时刻至多一个挂起单元（`unit`）与至多一个上游连接（`upstream`）；
//! - 挂起期间，协程的全部状态只存在于挂起单元与上游连接的缓冲区中。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};

use crate::phase::PhaseKind;
use crate::status::{IoStatus, PhaseStatus};
use crate::upstream::connection::{ConnState, UpstreamConnection};
use crate::value::HandleId;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// 请求标识，用于日志关联与宿主事件路由。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(u64);

impl RequestId {
    /// 分配进程内唯一的新标识。
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 脚本可见的接收槽：最近一次接收的数据与状态。
///
/// 新的数据块会覆盖旧数据；脚本应在每次恢复后及时取走。
#[derive(Debug, Default)]
pub struct RecvSlot {
    data: Option<Bytes>,
    status: IoStatus,
}

impl RecvSlot {
    pub(crate) fn deliver(&mut self, chunk: Bytes, status: IoStatus) {
        self.data = Some(chunk);
        self.status = status;
    }

    pub(crate) fn set_status(&mut self, status: IoStatus) {
        self.status = status;
    }

    pub(crate) fn clear(&mut self) {
        self.data = None;
    }

    pub fn status(&self) -> IoStatus {
        self.status
    }

    pub fn peek(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    pub fn take(&mut self) -> Option<Bytes> {
        self.data.take()
    }
}

/// 输出链记账：脚本产生的响应片段按顺序挂在链上，由宿主在输出过滤阶段取走。
#[derive(Debug, Default)]
pub struct OutputChain {
    chunks: Vec<Bytes>,
    bytes: usize,
    last_buf: bool,
}

impl OutputChain {
    pub(crate) fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push(chunk);
    }

    /// 标记链尾：此后不会再有输出。
    pub fn mark_last(&mut self) {
        self.last_buf = true;
    }

    pub fn is_last(&self) -> bool {
        self.last_buf
    }

    pub fn chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// 取走全部片段并拼接为一个缓冲区。
    pub fn drain(&mut self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.bytes);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.bytes = 0;
        out.freeze()
    }
}

/// 单请求计数器。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestStats {
    /// 桥接层收到的 I/O 事件数（含超时与睡眠唤醒）。
    pub events: u64,
    /// 恢复尝试次数。
    pub resumes: u64,
    /// 创建的挂起单元数。
    pub units_created: u64,
}

/// 一次请求的脚本桥接状态。
#[derive(Debug)]
pub struct RequestContext {
    id: RequestId,
    phase: Option<PhaseKind>,
    pub(crate) phase_status: PhaseStatus,
    pub(crate) request_status: PhaseStatus,
    pub(crate) unit: Option<HandleId>,
    pub(crate) upstream: Option<UpstreamConnection>,
    pub(crate) recv: RecvSlot,
    pub(crate) end_of_request: bool,
    output: OutputChain,
    pub(crate) stats: RequestStats,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::with_id(RequestId::next())
    }

    pub fn with_id(id: RequestId) -> Self {
        Self {
            id,
            phase: None,
            phase_status: PhaseStatus::Done,
            request_status: PhaseStatus::Done,
            unit: None,
            upstream: None,
            recv: RecvSlot::default(),
            end_of_request: false,
            output: OutputChain::default(),
            stats: RequestStats::default(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn phase(&self) -> Option<PhaseKind> {
        self.phase
    }

    pub(crate) fn enter_phase(&mut self, phase: PhaseKind) {
        self.phase = Some(phase);
    }

    pub fn phase_status(&self) -> PhaseStatus {
        self.phase_status
    }

    /// 请求级状态：内容类阶段入口会将其重置为 `Declined`。
    pub fn request_status(&self) -> PhaseStatus {
        self.request_status
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }

    pub fn unit(&self) -> Option<HandleId> {
        self.unit
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn upstream(&self) -> Option<&UpstreamConnection> {
        self.upstream.as_ref()
    }

    /// 上游连接的状态；没有连接时为 `Unconnected`。
    pub fn upstream_state(&self) -> ConnState {
        self.upstream
            .as_ref()
            .map_or(ConnState::Unconnected, UpstreamConnection::state)
    }

    pub fn recv_slot(&self) -> &RecvSlot {
        &self.recv
    }

    pub fn recv_slot_mut(&mut self) -> &mut RecvSlot {
        &mut self.recv
    }

    pub fn is_end_of_request(&self) -> bool {
        self.end_of_request
    }

    /// 标记请求结束（例如客户端断开）。之后的恢复尝试都会被拒绝。
    pub fn mark_end_of_request(&mut self) {
        self.end_of_request = true;
    }

    pub fn output(&self) -> &OutputChain {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputChain {
        &mut self.output
    }

    pub fn stats(&self) -> RequestStats {
        self.stats
    }

    /// 同时借出上游连接与接收槽，供套接字原语在一次调用中更新两者。
    pub(crate) fn upstream_and_slot(&mut self) -> Option<(&mut UpstreamConnection, &mut RecvSlot)> {
        let Self { upstream, recv, .. } = self;
        upstream.as_mut().map(|conn| (conn, recv))
    }
}
