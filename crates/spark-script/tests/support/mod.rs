//! 集成测试支撑模块：脚本化宿主与脚本化传输。
//!
//! # 模块定位（Why）
//! - 状态机只依赖 `EventHost` 与 `Transport`，因此测试可以逐事件驱动，不依赖真实网络与计时；
//! - 对端状态以 `Rc<RefCell<_>>` 在宿主、传输与断言之间共享，测试可以随时注入数据、关闭流或挂起错误。
//!
//! # 使用说明（How）
//! - `ScriptedHost::with_dials` 预置每次 `connect` 的结果；`peer()` 返回共享的对端状态；
//! - 所有宿主调用都会被记录，供断言“登记/撤销/释放”次数使用。

#![allow(dead_code)]

pub mod programs;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use spark_script::{
    ConnectProgress, Dialed, EventHost, Interest, PeerAcquire, PeerPool, PeerRejection, RequestId,
    ResolveTicket, TimerSlot, Transport,
};

/// 对端状态。
#[derive(Debug, Default)]
pub struct PeerState {
    /// 等待被读取的数据块。
    pub inbound: VecDeque<Vec<u8>>,
    /// 数据读完后是否返回有序关闭。
    pub eof: bool,
    /// 已写到对端的全部字节。
    pub written: Vec<u8>,
    /// 剩余可写容量；`None` 表示不限。
    pub write_capacity: Option<usize>,
    /// 下一次 `take_error` 返回的挂起错误。
    pub pending_error: Option<io::ErrorKind>,
    /// 读取时返回的硬错误。
    pub read_error: Option<io::ErrorKind>,
}

pub type Peer = Rc<RefCell<PeerState>>;

pub struct ScriptedTransport {
    peer: Peer,
}

impl ScriptedTransport {
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }
}

impl Transport for ScriptedTransport {
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut peer = self.peer.borrow_mut();
        let n = match peer.write_capacity {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(capacity) => capacity.min(buf.len()),
            None => buf.len(),
        };
        if let Some(capacity) = peer.write_capacity.as_mut() {
            *capacity -= n;
        }
        peer.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut peer = self.peer.borrow_mut();
        if let Some(kind) = peer.read_error {
            return Err(kind.into());
        }
        match peer.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    peer.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if peer.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        Ok(self
            .peer
            .borrow_mut()
            .pending_error
            .take()
            .map(io::Error::from))
    }
}

/// `connect` 的预置结果。
#[derive(Clone, Copy, Debug)]
pub enum Dial {
    Immediate,
    InProgress,
    Fail(io::ErrorKind),
}

/// 对端池的预置回答。
#[derive(Clone, Copy, Debug)]
pub enum PoolAnswer {
    Fresh,
    Cached,
    Busy,
    Declined,
}

pub struct ScriptedPool {
    peer: Peer,
    pub answers: VecDeque<PoolAnswer>,
    pub returned: Vec<SocketAddr>,
}

impl PeerPool for ScriptedPool {
    fn acquire(&mut self, _request: RequestId, _addr: SocketAddr) -> PeerAcquire {
        match self.answers.pop_front().unwrap_or(PoolAnswer::Fresh) {
            PoolAnswer::Fresh => PeerAcquire::Fresh,
            PoolAnswer::Cached => {
                PeerAcquire::Cached(Box::new(ScriptedTransport::new(Rc::clone(&self.peer))))
            }
            PoolAnswer::Busy => PeerAcquire::Rejected(PeerRejection::Busy),
            PoolAnswer::Declined => PeerAcquire::Rejected(PeerRejection::Declined),
        }
    }

    fn release(
        &mut self,
        _request: RequestId,
        addr: SocketAddr,
        _transport: Box<dyn Transport>,
    ) -> Option<Box<dyn Transport>> {
        self.returned.push(addr);
        None
    }
}

/// 记录全部调用的脚本化宿主。
#[derive(Default)]
pub struct ScriptedHost {
    peer: Peer,
    pub dials: VecDeque<Dial>,
    pub dialed: Vec<SocketAddr>,
    /// 当前处于登记状态的兴趣。
    pub armed: Vec<Interest>,
    pub arms: usize,
    pub disarms: Vec<Interest>,
    pub timers: HashMap<TimerSlot, Duration>,
    pub resolves: Vec<(ResolveTicket, String)>,
    pub cancelled: Vec<ResolveTicket>,
    pub run_phases: usize,
    pub released: usize,
    pub pool: Option<ScriptedPool>,
    next_ticket: u64,
}

impl ScriptedHost {
    pub fn with_dials(dials: impl IntoIterator<Item = Dial>) -> Self {
        Self {
            dials: dials.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_pool(mut self, answers: impl IntoIterator<Item = PoolAnswer>) -> Self {
        self.pool = Some(ScriptedPool {
            peer: Rc::clone(&self.peer),
            answers: answers.into_iter().collect(),
            returned: Vec::new(),
        });
        self
    }

    pub fn peer(&self) -> Peer {
        Rc::clone(&self.peer)
    }

    pub fn push_inbound(&self, data: &[u8]) {
        self.peer.borrow_mut().inbound.push_back(data.to_vec());
    }

    pub fn written(&self) -> Vec<u8> {
        self.peer.borrow().written.clone()
    }

    pub fn is_armed(&self, interest: Interest) -> bool {
        self.armed.contains(&interest)
    }
}

impl EventHost for ScriptedHost {
    fn connect(&mut self, _request: RequestId, addr: SocketAddr) -> io::Result<Dialed> {
        self.dialed.push(addr);
        let progress = match self.dials.pop_front() {
            Some(Dial::Immediate) => ConnectProgress::Connected,
            Some(Dial::InProgress) => ConnectProgress::InProgress,
            Some(Dial::Fail(kind)) => return Err(kind.into()),
            None => return Err(io::ErrorKind::ConnectionRefused.into()),
        };
        Ok(Dialed::new(
            Box::new(ScriptedTransport::new(Rc::clone(&self.peer))),
            progress,
        ))
    }

    fn arm(&mut self, _request: RequestId, interest: Interest) -> io::Result<()> {
        self.arms += 1;
        if !self.armed.contains(&interest) {
            self.armed.push(interest);
        }
        Ok(())
    }

    fn disarm(&mut self, _request: RequestId, interest: Interest) {
        self.disarms.push(interest);
        self.armed.retain(|armed| *armed != interest);
    }

    fn add_timer(&mut self, _request: RequestId, slot: TimerSlot, after: Duration) {
        self.timers.insert(slot, after);
    }

    fn del_timer(&mut self, _request: RequestId, slot: TimerSlot) {
        self.timers.remove(&slot);
    }

    fn resolve(&mut self, _request: RequestId, name: &str) -> io::Result<ResolveTicket> {
        self.next_ticket += 1;
        let ticket = ResolveTicket::new(self.next_ticket);
        self.resolves.push((ticket, name.to_owned()));
        Ok(ticket)
    }

    fn cancel_resolve(&mut self, _request: RequestId, ticket: ResolveTicket) {
        self.cancelled.push(ticket);
    }

    fn release_connection(&mut self, _request: RequestId) {
        self.released += 1;
        self.armed.clear();
        self.timers.remove(&TimerSlot::Read);
        self.timers.remove(&TimerSlot::Write);
    }

    fn run_phases(&mut self, _request: RequestId) {
        self.run_phases += 1;
    }

    fn peer_pool(&mut self) -> Option<&mut dyn PeerPool> {
        self.pool.as_mut().map(|pool| pool as &mut dyn PeerPool)
    }
}

/// 模拟“事件送达”：宿主侧的一次性兴趣在回送时失效。
pub fn fire(host: &mut ScriptedHost, interest: Interest) {
    host.armed.retain(|armed| *armed != interest);
}
