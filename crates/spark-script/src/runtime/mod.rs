//! # runtime：基于 Tokio 的宿主实现
//!
//! ## 角色定位（Why）
//! - 状态机只依赖 [`EventHost`](crate::host::EventHost)；这里给出一个可直接运行的宿主，
//!   用于本地联调与端到端测试；
//! - 所有任务都在同一个 `LocalSet` 上运行，保持“单线程协作”的执行模型。
//!
//! ## 组成（What）
//! - [`TokioHost`]：兴趣、定时器与解析都以一次性本地任务实现，完成后经无界通道回送 [`HostEvent`]；
//! - [`PhaseDriver`]：按流水线顺序运行阶段，挂起期间等待宿主事件并交给事件桥接。

mod driver;
mod tokio_host;

pub use driver::PhaseDriver;
pub use tokio_host::{HostEvent, TokioHost, TokioTransport};
