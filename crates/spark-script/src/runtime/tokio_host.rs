use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::context::RequestId;
use crate::host::{EventHost, Interest, ResolveTicket, TimerSlot};
use crate::upstream::transport::{ConnectProgress, Dialed, Transport};

/// 宿主回送给驱动的事件。
#[derive(Debug)]
pub enum HostEvent {
    Ready {
        request: RequestId,
        interest: Interest,
        token: u64,
    },
    Timer {
        request: RequestId,
        slot: TimerSlot,
        token: u64,
    },
    Resolved {
        request: RequestId,
        ticket: ResolveTicket,
        result: io::Result<Vec<IpAddr>>,
    },
}

impl HostEvent {
    pub fn request(&self) -> RequestId {
        match self {
            HostEvent::Ready { request, .. }
            | HostEvent::Timer { request, .. }
            | HostEvent::Resolved { request, .. } => *request,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Registration {
    Interest(Interest),
    Timer(TimerSlot),
}

/// Tokio 上的传输句柄：与宿主共享同一个 `TcpStream`。
pub struct TokioTransport {
    stream: Rc<TcpStream>,
}

impl Transport for TokioTransport {
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        self.stream.take_error()
    }
}

/// 基于 Tokio `LocalSet` 的宿主。
///
/// # 教案式说明
/// - **意图（Why）**：把 `arm`/`add_timer`/`resolve` 映射为一次性本地任务，完成时经通道回送事件，
///   从而满足“方法不阻塞、不重入引擎”的宿主契约；
/// - **逻辑（How）**：每个登记都带一个单调递增的令牌；`disarm`/`del_timer`/`release_connection`
///   移除登记并中止任务，[`TokioHost::next_event`] 丢弃令牌不匹配的过期事件；
/// - **契约（What）**：必须在 `LocalSet` 内使用（内部调用 `spawn_local`）；同一宿主可以先后服务多个请求，
///   [`TokioHost::next_event_for`] 会把其他请求仍然有效的事件暂存起来，留给它们自己的驱动取走。
pub struct TokioHost {
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: mpsc::UnboundedReceiver<HostEvent>,
    streams: HashMap<RequestId, Rc<TcpStream>>,
    pending: HashMap<(RequestId, Registration), (u64, JoinHandle<()>)>,
    resolves: HashMap<(RequestId, ResolveTicket), JoinHandle<()>>,
    advance: HashSet<RequestId>,
    deferred: VecDeque<HostEvent>,
    next_token: u64,
}

impl Default for TokioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioHost {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            streams: HashMap::new(),
            pending: HashMap::new(),
            resolves: HashMap::new(),
            advance: HashSet::new(),
            deferred: VecDeque::new(),
            next_token: 0,
        }
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn register(
        &mut self,
        request: RequestId,
        registration: Registration,
        token: u64,
        task: JoinHandle<()>,
    ) {
        if let Some((_, previous)) = self.pending.insert((request, registration), (token, task)) {
            previous.abort();
        }
    }

    fn unregister(&mut self, request: RequestId, registration: Registration) {
        if let Some((_, task)) = self.pending.remove(&(request, registration)) {
            task.abort();
        }
    }

    /// 等待下一个仍然有效的事件。
    pub async fn next_event(&mut self) -> Option<HostEvent> {
        loop {
            let event = self.rx.recv().await?;
            if self.accept(&event) {
                return Some(event);
            }
            trace!(request = %event.request(), "dropping stale host event");
        }
    }

    /// 等待属于 `request` 的下一个有效事件；其他请求的有效事件暂存，过期事件丢弃。
    pub async fn next_event_for(&mut self, request: RequestId) -> Option<HostEvent> {
        while let Some(at) = self
            .deferred
            .iter()
            .position(|event| event.request() == request)
        {
            if let Some(event) = self.deferred.remove(at)
                && self.accept(&event)
            {
                return Some(event);
            }
        }
        loop {
            let event = self.rx.recv().await?;
            if event.request() != request {
                if self.is_live(&event) {
                    trace!(request = %event.request(), waiting = %request, "deferring host event");
                    self.deferred.push_back(event);
                }
                continue;
            }
            if self.accept(&event) {
                return Some(event);
            }
            trace!(request = %request, "dropping stale host event");
        }
    }

    /// 丢弃请求结束后仍暂存的事件。
    pub fn forget(&mut self, request: RequestId) {
        self.deferred.retain(|event| event.request() != request);
        self.advance.remove(&request);
    }

    fn is_live(&self, event: &HostEvent) -> bool {
        match event {
            HostEvent::Resolved {
                request, ticket, ..
            } => self.resolves.contains_key(&(*request, *ticket)),
            HostEvent::Ready {
                request,
                interest,
                token,
            } => self.live_token(*request, Registration::Interest(*interest), *token),
            HostEvent::Timer {
                request,
                slot,
                token,
            } => self.live_token(*request, Registration::Timer(*slot), *token),
        }
    }

    fn live_token(&self, request: RequestId, registration: Registration, token: u64) -> bool {
        matches!(self.pending.get(&(request, registration)), Some((current, _)) if *current == token)
    }

    fn accept(&mut self, event: &HostEvent) -> bool {
        let (key, token) = match event {
            HostEvent::Ready {
                request,
                interest,
                token,
            } => ((*request, Registration::Interest(*interest)), *token),
            HostEvent::Timer {
                request,
                slot,
                token,
            } => ((*request, Registration::Timer(*slot)), *token),
            HostEvent::Resolved {
                request, ticket, ..
            } => return self.resolves.remove(&(*request, *ticket)).is_some(),
        };
        match self.pending.get(&key) {
            Some((current, _)) if *current == token => {
                self.pending.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// 取出并清除该请求的“推进流水线”通知。
    pub fn take_advance(&mut self, request: RequestId) -> bool {
        self.advance.remove(&request)
    }

    /// 尚未完成的登记数量（兴趣、定时器与解析）。
    pub fn pending_registrations(&self) -> usize {
        self.pending.len() + self.resolves.len()
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || is_einprogress(err)
}

#[cfg(unix)]
fn is_einprogress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn is_einprogress(_err: &io::Error) -> bool {
    false
}

impl EventHost for TokioHost {
    fn connect(&mut self, request: RequestId, addr: SocketAddr) -> io::Result<Dialed> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        let progress = match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => ConnectProgress::Connected,
            Err(err) if connect_in_progress(&err) => ConnectProgress::InProgress,
            Err(err) => return Err(err),
        };
        let stream = Rc::new(TcpStream::from_std(std::net::TcpStream::from(socket))?);
        self.streams.insert(request, Rc::clone(&stream));
        debug!(request = %request, %addr, ?progress, "tcp connect issued");
        Ok(Dialed::new(Box::new(TokioTransport { stream }), progress))
    }

    fn arm(&mut self, request: RequestId, interest: Interest) -> io::Result<()> {
        let stream = self
            .streams
            .get(&request)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let token = self.token();
        let tx = self.tx.clone();
        let task = tokio::task::spawn_local(async move {
            // 就绪等待失败同样回送事件，错误由随后的读写暴露。
            let _ = match interest {
                Interest::Read => stream.readable().await,
                Interest::Write => stream.writable().await,
            };
            let _ = tx.send(HostEvent::Ready {
                request,
                interest,
                token,
            });
        });
        self.register(request, Registration::Interest(interest), token, task);
        Ok(())
    }

    fn disarm(&mut self, request: RequestId, interest: Interest) {
        self.unregister(request, Registration::Interest(interest));
    }

    fn add_timer(&mut self, request: RequestId, slot: TimerSlot, after: Duration) {
        let token = self.token();
        let tx = self.tx.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(HostEvent::Timer {
                request,
                slot,
                token,
            });
        });
        self.register(request, Registration::Timer(slot), token, task);
    }

    fn del_timer(&mut self, request: RequestId, slot: TimerSlot) {
        self.unregister(request, Registration::Timer(slot));
    }

    fn resolve(&mut self, request: RequestId, name: &str) -> io::Result<ResolveTicket> {
        let ticket = ResolveTicket::new(self.token());
        let name = name.to_owned();
        let tx = self.tx.clone();
        let task = tokio::task::spawn_local(async move {
            let result = tokio::net::lookup_host((name.as_str(), 0))
                .await
                .map(|addrs| addrs.map(|addr| addr.ip()).collect());
            let _ = tx.send(HostEvent::Resolved {
                request,
                ticket,
                result,
            });
        });
        self.resolves.insert((request, ticket), task);
        Ok(ticket)
    }

    fn cancel_resolve(&mut self, request: RequestId, ticket: ResolveTicket) {
        if let Some(task) = self.resolves.remove(&(request, ticket)) {
            task.abort();
        }
    }

    fn release_connection(&mut self, request: RequestId) {
        self.streams.remove(&request);
        for registration in [
            Registration::Interest(Interest::Read),
            Registration::Interest(Interest::Write),
            Registration::Timer(TimerSlot::Read),
            Registration::Timer(TimerSlot::Write),
        ] {
            self.unregister(request, registration);
        }
    }

    fn run_phases(&mut self, request: RequestId) {
        self.advance.insert(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn events_for_other_requests_wait_for_their_driver() {
        LocalSet::new()
            .run_until(async {
                let mut host = TokioHost::new();
                let early = RequestId::next();
                let late = RequestId::next();
                host.add_timer(early, TimerSlot::Sleep, Duration::from_millis(1));
                host.add_timer(late, TimerSlot::Sleep, Duration::from_millis(20));

                let event = host.next_event_for(late).await.expect("late timer");
                assert_eq!(event.request(), late);
                assert_eq!(host.pending_registrations(), 1);

                let event = host.next_event_for(early).await.expect("deferred timer");
                assert_eq!(event.request(), early);
                assert_eq!(host.pending_registrations(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn cancelled_registrations_are_not_deferred() {
        LocalSet::new()
            .run_until(async {
                let mut host = TokioHost::new();
                let gone = RequestId::next();
                let waiting = RequestId::next();
                host.add_timer(gone, TimerSlot::Sleep, Duration::from_millis(1));
                host.add_timer(waiting, TimerSlot::Sleep, Duration::from_millis(20));
                tokio::time::sleep(Duration::from_millis(5)).await;
                host.del_timer(gone, TimerSlot::Sleep);

                host.next_event_for(waiting).await.expect("timer");
                host.forget(waiting);
                assert!(host.deferred.is_empty());
            })
            .await;
    }
}
