//! # host 模块说明
//!
//! ## 角色定位（Why）
//! - 宿主服务器的连接、事件、定时器与解析器原语属于外部协作者；本模块只定义它们在边界上的形状；
//! - 套接字原语与协程控制器只通过 [`EventHost`] 与宿主交互，因此同一套状态机既能跑在真实事件循环上，
//!   也能在测试中由脚本化宿主逐事件驱动。
//!
//! ## 事件回送约定（What）
//! - `arm` 登记的兴趣在就绪时**恰好一次**回送给 `ScriptEngine::dispatch_event`，之后需要重新登记；
//! - `disarm` 之后该兴趣不得再回送；
//! - `add_timer` 到期时回送对应的超时事件；`del_timer` 之后该定时器不得再回送；
//! - `resolve` 完成后回送 `ScriptEngine::dispatch_resolved`，携带同一张票据；
//! - `release_connection` 之后，该请求的连接相关事件（读写就绪、读写超时）不得再回送。

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::context::RequestId;
use crate::status::PeerRejection;
use crate::upstream::transport::{Dialed, Transport};

/// 连接上的事件兴趣。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Interest {
    Read,
    Write,
}

/// 每个请求至多三个并存的定时器槽位。
///
/// 连接超时复用写槽位：连接完成以写就绪事件呈现。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TimerSlot {
    Read,
    Write,
    Sleep,
}

/// 异步解析的票据。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ResolveTicket(u64);

impl ResolveTicket {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// 对端池的获取结果。
pub enum PeerAcquire {
    /// 池中没有可复用连接，需要新建。
    Fresh,
    /// 复用池中的已连接传输。
    Cached(Box<dyn Transport>),
    /// 对端选择被拒绝。
    Rejected(PeerRejection),
}

/// 宿主提供的对端池（负载均衡与长连接缓存的边界）。
pub trait PeerPool {
    fn acquire(&mut self, request: RequestId, addr: SocketAddr) -> PeerAcquire;

    /// 归还空闲连接；池不接收时原样返还，由调用方关闭。
    fn release(
        &mut self,
        request: RequestId,
        addr: SocketAddr,
        transport: Box<dyn Transport>,
    ) -> Option<Box<dyn Transport>>;
}

/// 宿主事件循环的边界契约。
///
/// # 教案式说明
/// - **意图 (Why)**：把“非阻塞连接、就绪通知、定时器、异步解析、推进流水线”五类宿主能力收敛为一个 trait；
/// - **契约 (What)**：所有方法都不得阻塞；事件一律异步回送，不得在方法内部重入脚本引擎；
/// - **风险 (Trade-offs)**：`peer_pool` 默认返回 `None`，即每次连接都新建传输。
pub trait EventHost {
    /// 发起非阻塞连接。立即失败时返回错误；连接中返回 `ConnectProgress::InProgress`。
    fn connect(&mut self, request: RequestId, addr: SocketAddr) -> io::Result<Dialed>;

    /// 登记一次性就绪兴趣。
    fn arm(&mut self, request: RequestId, interest: Interest) -> io::Result<()>;

    /// 撤销尚未触发的兴趣。
    fn disarm(&mut self, request: RequestId, interest: Interest);

    fn add_timer(&mut self, request: RequestId, slot: TimerSlot, after: Duration);

    fn del_timer(&mut self, request: RequestId, slot: TimerSlot);

    /// 发起异步域名解析。
    fn resolve(&mut self, request: RequestId, name: &str) -> io::Result<ResolveTicket>;

    fn cancel_resolve(&mut self, request: RequestId, ticket: ResolveTicket);

    /// 丢弃该请求连接上的全部登记（兴趣与读写定时器）。
    fn release_connection(&mut self, request: RequestId);

    /// 通知宿主推进到下一个流水线阶段。
    fn run_phases(&mut self, request: RequestId);

    fn peer_pool(&mut self) -> Option<&mut dyn PeerPool> {
        None
    }
}
