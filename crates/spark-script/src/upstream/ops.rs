//! # ops：脚本套接字原语与续体
//!
//! ## 角色定位（Why）
//! - 每个原语要么同步完成，要么登记续体、兴趣与超时后返回 [`IoStatus::Again`]；
//! - 续体由事件桥接在就绪或超时事件到达时运行，只更新缓冲区与状态，随后由桥接统一恢复协程。
//!
//! ## 返回码约定（What）
//! - `Ok`：操作完成；`Again`：需要等待事件（调用方必须挂起）；`Error`：致命失败，原因记录在 `last_error`；
//! - 对端选择失败（无存活上游、对端拒绝）同样返回 `Error`，与 `Again` 严格区分；
//! - 超时对该操作是终态，不会自动重试。
//!
//! ## 接收策略（How）
//! - `recv`：每次正向读取都立即把数据块交给接收槽并返回 `Again`；`WouldBlock` 重新登记读兴趣与读超时；
//!   对端有序关闭返回 `Ok`；
//! - `recv_wait`：只尝试一次，随后保持读续体处于登记状态，下一块数据由事件续体送达接收槽；
//! - `recv_sync`：私有累积，满足条件后一次性交付，绝不交付部分数据。

use std::io;
use std::net::IpAddr;

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use crate::config::SocketConfig;
use crate::context::{RecvSlot, RequestContext, RequestId};
use crate::error::{
    ARM, CONNECT, ErrorCategory, NO_LIVE_UPSTREAM_CODE, NO_RESOLVER_CODE, PEER_DECLINED_CODE,
    PREMATURE_EOF_CODE, RECV, RESOLVE, SEND, ScriptError, map_io_error, not_connected_error,
    timeout_error,
};
use crate::host::{EventHost, Interest, PeerAcquire, ResolveTicket, TimerSlot};
use crate::status::{IoStatus, PeerRejection};
use crate::upstream::connection::{
    ConnState, ReadContinuation, RecvLimit, RecvSyncState, Timeouts, UpstreamConnection,
    WriteContinuation,
};
use crate::upstream::resolver::{TargetAddr, pick_address};
use crate::upstream::transport::{ConnectProgress, Dialed};

/// 桥接层投递给续体的事件。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UpstreamEvent {
    Readable,
    Writable,
    ReadTimedOut,
    WriteTimedOut,
}

impl UpstreamEvent {
    /// 把宿主定时器槽位映射为超时事件；睡眠定时器不属于连接事件。
    pub fn from_timer(slot: TimerSlot) -> Option<Self> {
        match slot {
            TimerSlot::Read => Some(UpstreamEvent::ReadTimedOut),
            TimerSlot::Write => Some(UpstreamEvent::WriteTimedOut),
            TimerSlot::Sleep => None,
        }
    }

    pub fn from_interest(interest: Interest) -> Self {
        match interest {
            Interest::Read => UpstreamEvent::Readable,
            Interest::Write => UpstreamEvent::Writable,
        }
    }
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

pub(crate) fn connect(
    ctx: &mut RequestContext,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    target: &str,
    port: u16,
) -> IoStatus {
    let request = ctx.id();
    if ctx.upstream.is_some() {
        debug!(request = %request, "closing previous upstream before connecting again");
        close(ctx, host);
    }

    let mut conn = UpstreamConnection::new(target.trim(), port, Timeouts::from_config(socket));
    let status = match TargetAddr::parse(target, port) {
        Err(err) => {
            conn.fail(err);
            IoStatus::Error
        }
        Ok(TargetAddr::Socket(addr)) => {
            conn.port = addr.port();
            connect_peer(&mut conn, host, request, addr)
        }
        Ok(TargetAddr::Name { host: name, port }) => {
            conn.port = port;
            match host.resolve(request, &name) {
                Ok(ticket) => {
                    debug!(request = %request, host = %name, port, "resolving upstream");
                    conn.resolve = Some(ticket);
                    conn.state = ConnState::Resolving;
                    IoStatus::Again
                }
                Err(err) if err.kind() == io::ErrorKind::Unsupported => {
                    conn.fail(
                        ScriptError::new(
                            NO_RESOLVER_CODE,
                            format!("no resolver configured for upstream \"{name}\""),
                        )
                        .with_cause(err),
                    );
                    IoStatus::Error
                }
                Err(err) => {
                    conn.fail(map_io_error(RESOLVE, err));
                    IoStatus::Error
                }
            }
        }
    };

    conn.connect_status = status;
    if let Some(err) = conn.last_error.as_ref() {
        warn!(request = %request, code = err.code(), "upstream connect failed: {err}");
    }
    ctx.upstream = Some(conn);
    status
}

/// 从已确定的对端地址发起连接。
fn connect_peer(
    conn: &mut UpstreamConnection,
    host: &mut dyn EventHost,
    request: RequestId,
    addr: std::net::SocketAddr,
) -> IoStatus {
    conn.peer = Some(addr);

    if let Some(pool) = host.peer_pool() {
        match pool.acquire(request, addr) {
            PeerAcquire::Fresh => {}
            PeerAcquire::Cached(transport) => {
                debug!(request = %request, %addr, "reusing pooled upstream connection");
                conn.transport = Some(transport);
                conn.state = ConnState::Connected;
                conn.install_dummy_handlers();
                return IoStatus::Ok;
            }
            PeerAcquire::Rejected(PeerRejection::Busy) => {
                conn.fail(
                    ScriptError::new(NO_LIVE_UPSTREAM_CODE, "no live upstreams")
                        .with_category(ErrorCategory::Retryable),
                );
                return IoStatus::Error;
            }
            PeerAcquire::Rejected(PeerRejection::Declined) => {
                conn.fail(
                    ScriptError::new(PEER_DECLINED_CODE, "connect peer declined")
                        .with_category(ErrorCategory::Retryable),
                );
                return IoStatus::Error;
            }
        }
    }

    let Dialed {
        transport,
        progress,
    } = match host.connect(request, addr) {
        Ok(dialed) => dialed,
        Err(err) => {
            conn.fail(map_io_error(CONNECT, err));
            return IoStatus::Error;
        }
    };
    conn.transport = Some(transport);

    match progress {
        ConnectProgress::Connected => {
            debug!(request = %request, %addr, "upstream connected immediately");
            conn.state = ConnState::Connected;
            conn.install_dummy_handlers();
            IoStatus::Ok
        }
        ConnectProgress::InProgress => {
            conn.state = ConnState::Connecting;
            conn.write_handler = WriteContinuation::Connected;
            if let Err(err) = host.arm(request, Interest::Write) {
                conn.write_handler = WriteContinuation::Dummy;
                conn.fail(map_io_error(ARM, err));
                return IoStatus::Error;
            }
            conn.write.active = true;
            host.add_timer(request, TimerSlot::Write, conn.timeouts.connect);
            debug!(request = %request, %addr, "upstream connect in progress");
            IoStatus::Again
        }
    }
}

/// 异步解析完成。返回 `None` 表示结果已过期（连接已关闭或被替换）。
pub(crate) fn complete_resolve(
    ctx: &mut RequestContext,
    host: &mut dyn EventHost,
    ticket: ResolveTicket,
    result: io::Result<Vec<IpAddr>>,
) -> Option<IoStatus> {
    let request = ctx.id();
    let Some(conn) = ctx.upstream.as_mut() else {
        debug!(request = %request, "resolution finished after upstream was closed");
        return None;
    };
    if conn.resolve != Some(ticket) {
        debug!(request = %request, ticket = ticket.get(), "discarding stale resolution");
        return None;
    }
    conn.resolve = None;

    let status = match result {
        Ok(addrs) => match pick_address(&addrs, conn.port, &mut rand::rng()) {
            Some(addr) => connect_peer(conn, host, request, addr),
            None => {
                conn.fail(ScriptError::new(
                    RESOLVE.code,
                    format!("upstream \"{}\" could not be resolved", conn.target),
                ));
                IoStatus::Error
            }
        },
        Err(err) => {
            conn.fail(map_io_error(RESOLVE, err));
            IoStatus::Error
        }
    };
    conn.connect_status = status;
    if let Some(err) = conn.last_error.as_ref().filter(|_| status.is_error()) {
        warn!(request = %request, code = err.code(), "upstream connect failed: {err}");
    }
    Some(status)
}

/// 写就绪续体：判定异步连接的结果。
fn on_connect_ready(
    conn: &mut UpstreamConnection,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    request: RequestId,
    timed_out: bool,
) {
    conn.write_handler = WriteContinuation::Dummy;
    if timed_out {
        if socket.log_socket_errors {
            error!(request = %request, "upstream connect timed out");
        }
        host.disarm(request, Interest::Write);
        conn.write.active = false;
        conn.fail(timeout_error(CONNECT));
        conn.connect_status = IoStatus::Error;
        return;
    }

    host.del_timer(request, TimerSlot::Write);
    let pending = match conn.transport.as_mut() {
        Some(transport) => transport.take_error(),
        None => Ok(Some(io::Error::from(io::ErrorKind::NotConnected))),
    };
    match pending {
        Ok(None) => {
            debug!(request = %request, "upstream connected");
            conn.state = ConnState::Connected;
            conn.install_dummy_handlers();
            conn.connect_status = IoStatus::Ok;
        }
        Ok(Some(err)) | Err(err) => {
            let err = map_io_error(CONNECT, err);
            warn!(request = %request, code = err.code(), "upstream connect failed: {err}");
            conn.fail(err);
            conn.connect_status = IoStatus::Error;
        }
    }
}

// ---------------------------------------------------------------------------
// send
// ---------------------------------------------------------------------------

enum Flush {
    Drained,
    WouldBlock,
    Failed(io::Error),
}

pub(crate) fn send(ctx: &mut RequestContext, host: &mut dyn EventHost, data: Bytes) -> IoStatus {
    let request = ctx.id();
    let Some(conn) = ctx.upstream.as_mut() else {
        warn!(request = %request, "send without upstream connection");
        return IoStatus::Error;
    };
    if !conn.state.is_established() {
        conn.last_error = Some(not_connected_error(SEND));
        conn.send_status = IoStatus::Error;
        return IoStatus::Error;
    }

    conn.send_chain.push(data);
    if conn.write_handler == WriteContinuation::Send {
        // 已在等待写就绪，新数据排在链尾。
        return IoStatus::Again;
    }
    let status = flush(conn, host, request);
    conn.send_status = status;
    status
}

fn flush(conn: &mut UpstreamConnection, host: &mut dyn EventHost, request: RequestId) -> IoStatus {
    let outcome = loop {
        let Some(chunk) = conn.send_chain.front() else {
            break Flush::Drained;
        };
        let Some(transport) = conn.transport.as_mut() else {
            break Flush::Failed(io::Error::from(io::ErrorKind::NotConnected));
        };
        match transport.try_send(chunk) {
            Ok(0) => break Flush::Failed(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                trace!(request = %request, sent = n, "upstream send progress");
                conn.send_chain.advance(n);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                conn.write.ready = false;
                break Flush::WouldBlock;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => break Flush::Failed(err),
        }
    };

    match outcome {
        Flush::Drained => {
            host.del_timer(request, TimerSlot::Write);
            conn.write_handler = WriteContinuation::Dummy;
            conn.write.active = false;
            if conn.state == ConnState::Sending {
                conn.state = ConnState::Connected;
            }
            IoStatus::Ok
        }
        Flush::WouldBlock => {
            conn.write_handler = WriteContinuation::Send;
            if let Err(err) = host.arm(request, Interest::Write) {
                conn.write_handler = WriteContinuation::Dummy;
                conn.send_chain.clear();
                conn.fail(map_io_error(ARM, err));
                return IoStatus::Error;
            }
            conn.write.active = true;
            conn.state = ConnState::Sending;
            host.add_timer(request, TimerSlot::Write, conn.timeouts.write);
            debug!(request = %request, pending = conn.send_chain.pending(), "upstream send would block");
            IoStatus::Again
        }
        Flush::Failed(err) => {
            host.del_timer(request, TimerSlot::Write);
            conn.write_handler = WriteContinuation::Dummy;
            conn.send_chain.clear();
            let err = map_io_error(SEND, err);
            warn!(request = %request, code = err.code(), "upstream send failed: {err}");
            conn.fail(err);
            IoStatus::Error
        }
    }
}

/// 写就绪续体：继续排空待发送链。
fn on_send_ready(
    conn: &mut UpstreamConnection,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    request: RequestId,
    timed_out: bool,
) {
    if timed_out {
        if socket.log_socket_errors {
            error!(request = %request, "upstream write timed out");
        }
        host.disarm(request, Interest::Write);
        conn.write_handler = WriteContinuation::Dummy;
        conn.write.active = false;
        conn.send_chain.clear();
        conn.fail(timeout_error(SEND));
        conn.send_status = IoStatus::Error;
        return;
    }
    conn.write_handler = WriteContinuation::Dummy;
    conn.send_status = flush(conn, host, request);
}

// ---------------------------------------------------------------------------
// recv
// ---------------------------------------------------------------------------

enum RecvStep {
    Chunk,
    Eof,
    Rearm,
    Failed(io::Error),
}

/// 借出已建立的连接与接收槽；连接不存在或未建立时记录错误并返回 `None`。
fn established<'a>(
    ctx: &'a mut RequestContext,
) -> Option<(&'a mut UpstreamConnection, &'a mut RecvSlot)> {
    let request = ctx.id();
    if ctx.upstream.is_none() {
        warn!(request = %request, "recv without upstream connection");
        ctx.recv.set_status(IoStatus::Error);
        return None;
    }
    let (conn, slot) = ctx.upstream_and_slot()?;
    if !conn.state.is_established() {
        conn.last_error = Some(not_connected_error(RECV));
        slot.set_status(IoStatus::Error);
        return None;
    }
    Some((conn, slot))
}

pub(crate) fn recv(
    ctx: &mut RequestContext,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
) -> IoStatus {
    let request = ctx.id();
    let Some((conn, slot)) = established(ctx) else {
        return IoStatus::Error;
    };
    recv_into(conn, slot, host, socket, request)
}

fn recv_into(
    conn: &mut UpstreamConnection,
    slot: &mut RecvSlot,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    request: RequestId,
) -> IoStatus {
    if !conn.recv_buf.is_active() {
        conn.recv_buf.begin(socket.buffer_size);
    }

    let step = loop {
        if conn.recv_buf.remaining() == 0 {
            conn.recv_buf.begin(socket.buffer_size);
            break RecvStep::Rearm;
        }
        if conn.read.active && !conn.read.ready {
            break RecvStep::Rearm;
        }
        let Some(transport) = conn.transport.as_mut() else {
            break RecvStep::Failed(io::Error::from(io::ErrorKind::NotConnected));
        };
        match transport.try_recv(conn.recv_buf.spare_mut()) {
            Ok(0) => break RecvStep::Eof,
            Ok(n) => {
                conn.recv_buf.commit(n);
                break RecvStep::Chunk;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                conn.read.ready = false;
                break RecvStep::Rearm;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => break RecvStep::Failed(err),
        }
    };

    match step {
        RecvStep::Chunk => {
            let chunk = conn.recv_buf.take_filled();
            conn.recv_buf.reset();
            trace!(request = %request, len = chunk.len(), "upstream chunk received");
            slot.deliver(chunk, IoStatus::Again);
            finish_read(conn, host, request);
            IoStatus::Again
        }
        RecvStep::Eof => {
            conn.recv_buf.reset();
            finish_read(conn, host, request);
            slot.set_status(IoStatus::Ok);
            debug!(request = %request, "upstream closed the stream");
            IoStatus::Ok
        }
        RecvStep::Rearm => arm_read(conn, slot, host, request, ReadContinuation::Recv),
        RecvStep::Failed(err) => {
            conn.recv_buf.reset();
            fail_read(conn, slot, host, request, map_io_error(RECV, err))
        }
    }
}

pub(crate) fn recv_wait(
    ctx: &mut RequestContext,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
) -> IoStatus {
    let request = ctx.id();
    let Some((conn, slot)) = established(ctx) else {
        return IoStatus::Error;
    };
    conn.recv_buf.begin(socket.buffer_size);

    let attempt = loop {
        let Some(transport) = conn.transport.as_mut() else {
            break Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        match transport.try_recv(conn.recv_buf.spare_mut()) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => break other,
        }
    };

    match attempt {
        Ok(0) => {
            conn.recv_buf.reset();
            finish_read(conn, host, request);
            slot.set_status(IoStatus::Ok);
            return IoStatus::Ok;
        }
        Ok(n) => {
            conn.recv_buf.commit(n);
            let chunk = conn.recv_buf.take_filled();
            slot.deliver(chunk, IoStatus::Again);
            conn.recv_buf.begin(socket.buffer_size);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            conn.read.ready = false;
        }
        Err(err) => {
            conn.recv_buf.reset();
            return fail_read(conn, slot, host, request, map_io_error(RECV, err));
        }
    }

    // 缓冲区保持激活，后续数据由读续体送达。
    match arm_read(conn, slot, host, request, ReadContinuation::Recv) {
        IoStatus::Error => IoStatus::Error,
        _ => IoStatus::Ok,
    }
}

pub(crate) fn recv_sync(
    ctx: &mut RequestContext,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    limit: RecvLimit,
) -> IoStatus {
    let request = ctx.id();
    let Some((conn, slot)) = established(ctx) else {
        return IoStatus::Error;
    };
    if conn.sync.is_some() && conn.read_handler == ReadContinuation::RecvSync {
        return IoStatus::Again;
    }
    if conn.sync.is_none() {
        slot.clear();
        conn.sync = Some(RecvSyncState::new(limit));
    }
    drive_recv_sync(conn, slot, host, socket, request)
}

fn drive_recv_sync(
    conn: &mut UpstreamConnection,
    slot: &mut RecvSlot,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    request: RequestId,
) -> IoStatus {
    let Some(mut sync) = conn.sync.take() else {
        return IoStatus::Ok;
    };

    loop {
        if sync.is_satisfied() {
            break;
        }
        let want = sync.want(socket.buffer_size);
        conn.recv_buf.begin(socket.buffer_size);
        let Some(transport) = conn.transport.as_mut() else {
            conn.recv_buf.reset();
            let err = map_io_error(RECV, io::Error::from(io::ErrorKind::NotConnected));
            return fail_read(conn, slot, host, request, err);
        };
        match transport.try_recv(&mut conn.recv_buf.spare_mut()[..want]) {
            Ok(0) => {
                conn.recv_buf.reset();
                match sync.limit {
                    RecvLimit::ToEof => break,
                    RecvLimit::Exactly(expected) => {
                        let err = ScriptError::new(
                            PREMATURE_EOF_CODE,
                            format!(
                                "upstream closed after {} of {expected} bytes",
                                sync.acc.len()
                            ),
                        );
                        return fail_read(conn, slot, host, request, err);
                    }
                }
            }
            Ok(n) => {
                conn.recv_buf.commit(n);
                sync.acc.extend_from_slice(conn.recv_buf.filled());
                conn.recv_buf.reset();
                trace!(request = %request, total = sync.acc.len(), "recv_sync progress");
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                conn.recv_buf.reset();
                conn.read.ready = false;
                conn.sync = Some(sync);
                return arm_read(conn, slot, host, request, ReadContinuation::RecvSync);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                conn.recv_buf.reset();
            }
            Err(err) => {
                conn.recv_buf.reset();
                return fail_read(conn, slot, host, request, map_io_error(RECV, err));
            }
        }
    }

    finish_read(conn, host, request);
    slot.deliver(sync.acc.freeze(), IoStatus::Ok);
    debug!(request = %request, "recv_sync complete");
    IoStatus::Ok
}

fn arm_read(
    conn: &mut UpstreamConnection,
    slot: &mut RecvSlot,
    host: &mut dyn EventHost,
    request: RequestId,
    continuation: ReadContinuation,
) -> IoStatus {
    conn.read_handler = continuation;
    if let Err(err) = host.arm(request, Interest::Read) {
        conn.recv_buf.reset();
        conn.sync = None;
        return fail_read(conn, slot, host, request, map_io_error(ARM, err));
    }
    conn.read.active = true;
    conn.state = ConnState::Receiving;
    host.add_timer(request, TimerSlot::Read, conn.timeouts.read);
    slot.set_status(IoStatus::Again);
    IoStatus::Again
}

/// 读方向回到空续体，撤销仍在等待的兴趣与读超时。
fn finish_read(conn: &mut UpstreamConnection, host: &mut dyn EventHost, request: RequestId) {
    host.del_timer(request, TimerSlot::Read);
    if conn.read.active {
        host.disarm(request, Interest::Read);
        conn.read.active = false;
    }
    conn.read_handler = ReadContinuation::Dummy;
    if conn.state == ConnState::Receiving {
        conn.state = ConnState::Connected;
    }
}

fn fail_read(
    conn: &mut UpstreamConnection,
    slot: &mut RecvSlot,
    host: &mut dyn EventHost,
    request: RequestId,
    err: ScriptError,
) -> IoStatus {
    finish_read(conn, host, request);
    conn.sync = None;
    if !err.is_timeout() {
        warn!(request = %request, code = err.code(), "upstream recv failed: {err}");
    }
    conn.fail(err);
    slot.clear();
    slot.set_status(IoStatus::Error);
    IoStatus::Error
}

/// 读就绪续体。
fn on_read_ready(
    conn: &mut UpstreamConnection,
    slot: &mut RecvSlot,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    request: RequestId,
    timed_out: bool,
) {
    let continuation = conn.read_handler;
    if timed_out {
        if socket.log_socket_errors {
            error!(request = %request, "upstream read timed out");
        }
        conn.recv_buf.reset();
        fail_read(conn, slot, host, request, timeout_error(RECV));
        return;
    }

    host.del_timer(request, TimerSlot::Read);
    match continuation {
        ReadContinuation::Dummy => {}
        ReadContinuation::Recv => {
            if conn.recv_buf.is_active() {
                recv_into(conn, slot, host, socket, request);
            } else {
                conn.read_handler = ReadContinuation::Dummy;
            }
        }
        ReadContinuation::RecvSync => {
            drive_recv_sync(conn, slot, host, socket, request);
        }
    }
}

/// 运行事件对应方向上登记的续体，恰好一次。
pub(crate) fn run_continuation(
    ctx: &mut RequestContext,
    host: &mut dyn EventHost,
    socket: &SocketConfig,
    event: UpstreamEvent,
) {
    let request = ctx.id();
    let Some((conn, slot)) = ctx.upstream_and_slot() else {
        debug!(request = %request, ?event, "event without upstream connection");
        return;
    };

    match event {
        UpstreamEvent::Readable | UpstreamEvent::ReadTimedOut => {
            let timed_out = event == UpstreamEvent::ReadTimedOut;
            if !timed_out {
                conn.read.ready = true;
                conn.read.active = false;
            }
            if conn.read_handler == ReadContinuation::Dummy {
                trace!(request = %request, ?event, "read event on idle upstream");
                return;
            }
            on_read_ready(conn, slot, host, socket, request, timed_out);
        }
        UpstreamEvent::Writable | UpstreamEvent::WriteTimedOut => {
            let timed_out = event == UpstreamEvent::WriteTimedOut;
            if !timed_out {
                conn.write.ready = true;
                conn.write.active = false;
            }
            match conn.write_handler {
                WriteContinuation::Dummy => {
                    trace!(request = %request, ?event, "write event on idle upstream");
                }
                WriteContinuation::Connected => {
                    on_connect_ready(conn, host, socket, request, timed_out)
                }
                WriteContinuation::Send => on_send_ready(conn, host, socket, request, timed_out),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// close
// ---------------------------------------------------------------------------

/// 关闭上游连接；没有连接时是空操作，可重复调用。
pub(crate) fn close(ctx: &mut RequestContext, host: &mut dyn EventHost) {
    let request = ctx.id();
    let Some(mut conn) = ctx.upstream.take() else {
        return;
    };

    host.del_timer(request, TimerSlot::Read);
    host.del_timer(request, TimerSlot::Write);
    if let Some(ticket) = conn.resolve.take() {
        host.cancel_resolve(request, ticket);
    }
    host.release_connection(request);

    let idle = conn.is_idle();
    if let Some(transport) = conn.transport.take() {
        match (idle, conn.peer, host.peer_pool()) {
            (true, Some(addr), Some(pool)) => {
                if pool.release(request, addr, transport).is_none() {
                    debug!(request = %request, %addr, "upstream connection returned to pool");
                }
            }
            _ => drop(transport),
        }
    }

    conn.recv_buf.release();
    conn.send_chain.clear();
    conn.sync = None;
    debug!(request = %request, state = ?conn.state, "upstream closed");
}
