//! # upstream 模块说明
//!
//! ## 角色定位（Why）
//! - 为脚本提供单条出站连接的非阻塞生命周期：解析、连接、缓冲发送、缓冲接收与关闭；
//! - 每个原语要么同步完成，要么登记续体与超时后返回 `Again`，由事件桥接在事件到达时重新进入。
//!
//! ## 子模块（What）
//! - [`buffer`]：接收缓冲区（start/pos/last/end 语义）与待发送链；
//! - [`resolver`]：目标解析（字面地址快路径）与多地址选择；
//! - [`transport`]：宿主提供的传输句柄契约；
//! - [`connection`]：连接状态、续体与超时配置；
//! - `ops`：脚本原语及其续体实现（crate 内部）。

pub mod buffer;
pub mod connection;
pub(crate) mod ops;
pub mod resolver;
pub mod transport;

pub use buffer::{RecvBuffer, SendChain};
pub use connection::{
    ConnState, ReadContinuation, Readiness, RecvLimit, Timeouts, UpstreamConnection,
    WriteContinuation,
};
pub use ops::UpstreamEvent;
pub use resolver::{TargetAddr, pick_address};
pub use transport::{ConnectProgress, Dialed, Transport};
