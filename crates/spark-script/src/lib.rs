#![doc = r#"
# spark-script

## 设计动机（Why）
- **定位**：让请求流水线在 rewrite/access/content/log/header_filter/body_filter 等阶段运行脚本例程，
  并允许例程在非阻塞网络 I/O 处挂起，而不阻塞单线程事件循环。
- **架构角色**：核心是“挂起/恢复桥接”：协程控制器把阶段例程作为可挂起单元创建、查询与恢复；
  上游套接字层（解析、连接、缓冲发送、缓冲接收）产生的就绪事件就是恢复的触发源。
- **设计理念**：解释器、宿主事件循环与对端池都是外部协作者，分别以 [`Interpreter`]、[`EventHost`]、
  [`PeerPool`] 描述边界；所有故障在边界处转换为状态码，绝不以 panic 穿越宿主调用栈。

## 核心契约（What）
- 阶段状态：[`PhaseStatus`] 的 `Done`/`Suspended`/`Declined`；故障按 `Done` 处理，避免请求悬挂；
- 套接字原语返回 [`IoStatus`] 的 `Ok`/`Again`/`Error`；`Again` 意味着脚本必须让出控制权；
- 每个送达的 I/O 事件恰好对应一次恢复尝试，且恢复发生在该事件的续体运行之后；
- 每个请求同一时刻至多一个挂起单元与一个上游连接；`exit` 与 `close` 都可以重复调用。

## 实现策略（How）
- [`ScriptEngine`] 独占 [`CallAdapter`]、[`FragmentCache`] 与 [`SocketConfig`]，以显式的
  [`RequestContext`] 贯穿“事件桥接 → 套接字续体 → 协程控制器”，不存在进程级“当前请求”；
- [`NativeInterpreter`] 以显式状态机（[`NativeCoroutine`]）实现可挂起例程，可直接嵌入使用；
- 启用 `runtime-tokio`（默认）时提供基于 Tokio `LocalSet` 的宿主与流水线驱动。

## 风险与考量（Trade-offs）
- 引擎与上下文都是 `!Send`，按单线程协作模型设计；多核扩展应以“每线程一个引擎”的方式进行；
- 超时对单次操作是终态，重试策略属于脚本层决策。
"#]

pub mod bridge;
pub mod call;
pub mod config;
pub mod context;
pub mod coroutine;
pub mod error;
pub mod fragment;
pub mod host;
pub mod interp;
pub mod observability;
pub mod phase;
#[cfg(feature = "runtime-tokio")]
pub mod runtime;
pub mod scope;
pub mod status;
pub mod upstream;
pub mod value;

pub use bridge::UpstreamEvent;
pub use call::CallAdapter;
pub use config::{ConfigScope, LocationConfig, LocationScope, ScriptConfig, SocketConfig};
pub use context::{OutputChain, RecvSlot, RequestContext, RequestId, RequestStats};
pub use coroutine::ScriptEngine;
pub use error::{CallError, ConfigError, ErrorCategory, Fault, FaultKind, ScriptError};
pub use fragment::{FragmentCache, FragmentId, FragmentSource, PhaseCodeFragment};
pub use host::{EventHost, Interest, PeerAcquire, PeerPool, ResolveTicket, TimerSlot};
pub use interp::native::{Invocation, NativeCoroutine, NativeInterpreter, Step};
pub use interp::{
    Argument, CallFrame, CallTarget, Interpreter, IterMethod, ParamSpec, PassMode, RoutineSignature,
};
pub use phase::PhaseKind;
pub use scope::ScriptScope;
pub use status::{IoStatus, PeerRejection, PhaseStatus, ResumeOutcome};
pub use upstream::{ConnState, ConnectProgress, Dialed, RecvLimit, Transport, UpstreamConnection};
pub use value::{HandleId, ScriptValue, ValueRef};
