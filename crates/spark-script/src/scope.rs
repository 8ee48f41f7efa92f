//! # scope：脚本可见的请求视图
//!
//! ## 角色定位（Why）
//! - 例程执行期间只能通过 [`ScriptScope`] 触达请求状态与宿主能力，解释器无需知道事件循环的存在；
//! - 套接字原语的返回值就是 [`IoStatus`]：脚本看到 `Again` 时必须让出控制权（`Step::Yield`），
//!   事件续体完成后由控制器恢复，脚本再读取 `connect_status` / `send_status` / `recv_status` 得到结果。
//!
//! ## 契约（What）
//! - 作用域只在一次调用期间存活，不可跨挂起点保存；
//! - `sleep` 登记睡眠定时器并返回 `Again`，到期后以一次恢复唤醒协程。

use std::time::Duration;

use bytes::Bytes;

use crate::config::SocketConfig;
use crate::context::{RequestContext, RequestId};
use crate::error::ScriptError;
use crate::host::{EventHost, TimerSlot};
use crate::status::IoStatus;
use crate::upstream::ops;
use crate::upstream::{ConnState, RecvLimit};

/// 一次例程调用期间的请求视图。
pub struct ScriptScope<'a> {
    ctx: &'a mut RequestContext,
    host: &'a mut dyn EventHost,
    socket: &'a SocketConfig,
}

impl<'a> ScriptScope<'a> {
    pub(crate) fn new(
        ctx: &'a mut RequestContext,
        host: &'a mut dyn EventHost,
        socket: &'a SocketConfig,
    ) -> Self {
        Self { ctx, host, socket }
    }

    pub fn request_id(&self) -> RequestId {
        self.ctx.id()
    }

    /// 连接上游；已有连接时先关闭旧连接。
    pub fn connect(&mut self, target: &str, port: u16) -> IoStatus {
        ops::connect(self.ctx, self.host, self.socket, target, port)
    }

    /// 最近一次连接的结果；没有连接时为 `Error`。
    pub fn connect_status(&self) -> IoStatus {
        self.ctx
            .upstream()
            .map_or(IoStatus::Error, |conn| conn.connect_status())
    }

    pub fn send(&mut self, data: impl Into<Bytes>) -> IoStatus {
        ops::send(self.ctx, self.host, data.into())
    }

    pub fn send_status(&self) -> IoStatus {
        self.ctx
            .upstream()
            .map_or(IoStatus::Error, |conn| conn.send_status())
    }

    pub fn recv(&mut self) -> IoStatus {
        ops::recv(self.ctx, self.host, self.socket)
    }

    pub fn recv_wait(&mut self) -> IoStatus {
        ops::recv_wait(self.ctx, self.host, self.socket)
    }

    pub fn recv_sync(&mut self, limit: RecvLimit) -> IoStatus {
        ops::recv_sync(self.ctx, self.host, self.socket, limit)
    }

    pub fn recv_status(&self) -> IoStatus {
        self.ctx.recv_slot().status()
    }

    /// 取走接收槽中的数据块。
    pub fn take_received(&mut self) -> Option<Bytes> {
        self.ctx.recv_slot_mut().take()
    }

    pub fn close(&mut self) {
        ops::close(self.ctx, self.host);
    }

    pub fn sleep(&mut self, after: Duration) -> IoStatus {
        self.host.add_timer(self.ctx.id(), TimerSlot::Sleep, after);
        IoStatus::Again
    }

    /// 向下游输出链追加数据。
    pub fn output(&mut self, data: impl Into<Bytes>) {
        self.ctx.output_mut().push(data.into());
    }

    pub fn last_error(&self) -> Option<&ScriptError> {
        self.ctx.upstream().and_then(|conn| conn.last_error())
    }

    pub fn upstream_state(&self) -> ConnState {
        self.ctx.upstream_state()
    }

    pub fn is_end_of_request(&self) -> bool {
        self.ctx.is_end_of_request()
    }
}
