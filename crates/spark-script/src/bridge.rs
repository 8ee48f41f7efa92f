//! # bridge：事件到恢复的唯一入口
//!
//! ## 角色定位（Why）
//! - 宿主事件循环只需把事件交给这里；桥接先运行对应方向上登记的续体（恰好一次），再无条件恢复协程；
//! - 因此每个送达的事件都恰好对应一次恢复尝试，且恢复严格发生在续体更新缓冲区与状态之后。
//!
//! ## 例外（What）
//! - 解析完成只在连接随之同步结束（成功或失败）时恢复；连接仍在进行时等待随后的写就绪事件；
//! - 过期的解析结果（连接已关闭或被替换）被丢弃，不恢复。

use std::io;
use std::net::IpAddr;

use tracing::trace;

use crate::context::RequestContext;
use crate::coroutine::ScriptEngine;
use crate::host::{EventHost, ResolveTicket};
use crate::interp::Interpreter;
use crate::status::ResumeOutcome;
use crate::upstream::ops;

pub use crate::upstream::ops::UpstreamEvent;

impl<I: Interpreter> ScriptEngine<I> {
    /// 连接就绪或超时事件。
    pub fn dispatch_event(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
        event: UpstreamEvent,
    ) -> ResumeOutcome {
        ctx.stats.events += 1;
        trace!(request = %ctx.id(), ?event, "dispatching upstream event");
        ops::run_continuation(ctx, host, &self.socket, event);
        self.resume(ctx, host)
    }

    /// 异步解析完成。返回 `None` 表示没有触发恢复。
    pub fn dispatch_resolved(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
        ticket: ResolveTicket,
        result: io::Result<Vec<IpAddr>>,
    ) -> Option<ResumeOutcome> {
        let status = ops::complete_resolve(ctx, host, ticket, result)?;
        if status.is_again() {
            return None;
        }
        ctx.stats.events += 1;
        Some(self.resume(ctx, host))
    }

    /// 睡眠定时器到期。
    pub fn dispatch_sleep(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
    ) -> ResumeOutcome {
        ctx.stats.events += 1;
        self.resume(ctx, host)
    }
}
