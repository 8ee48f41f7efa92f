use std::future::Future;
use std::pin::pin;

use tracing::{debug, info};

use crate::bridge::UpstreamEvent;
use crate::config::LocationScope;
use crate::context::RequestContext;
use crate::coroutine::ScriptEngine;
use crate::interp::Interpreter;
use crate::phase::PhaseKind;
use crate::runtime::tokio_host::{HostEvent, TokioHost};
use crate::status::PhaseStatus;

enum Wake {
    Disconnected,
    Event(Option<HostEvent>),
}

/// 单个 location 的流水线驱动。
///
/// # 教案式说明
/// - **意图（Why）**：以最少的代码演示宿主如何使用控制器：阶段入口返回 `Suspended` 时交还控制权，
///   之后每个宿主事件恰好经过事件桥接一次；
/// - **逻辑（How）**：按 [`PhaseKind::PIPELINE`] 顺序运行阶段；挂起期间以 `biased` 的 `select!`
///   同时等待“客户端断开”与宿主事件，断开优先；
/// - **契约（What）**：返回每个已运行阶段的最终状态；无论正常结束还是断开，请求都会被收尾
///   （标记结束并执行 `exit`）。
pub struct PhaseDriver<'a, I> {
    engine: &'a mut ScriptEngine<I>,
    host: &'a mut TokioHost,
    location: &'a LocationScope,
}

impl<'a, I: Interpreter> PhaseDriver<'a, I> {
    pub fn new(
        engine: &'a mut ScriptEngine<I>,
        host: &'a mut TokioHost,
        location: &'a LocationScope,
    ) -> Self {
        Self {
            engine,
            host,
            location,
        }
    }

    pub async fn run_request(
        &mut self,
        ctx: &mut RequestContext,
        disconnect: impl Future<Output = ()>,
    ) -> Vec<(PhaseKind, PhaseStatus)> {
        let request = ctx.id();
        let mut disconnect = pin!(disconnect);
        let mut report = Vec::with_capacity(PhaseKind::PIPELINE.len());

        for phase in PhaseKind::PIPELINE {
            let mut status = self.engine.run_phase(ctx, self.host, self.location, phase);
            while status.is_suspended() {
                let wake = tokio::select! {
                    biased;
                    () = &mut disconnect => Wake::Disconnected,
                    event = self.host.next_event_for(request) => Wake::Event(event),
                };
                let event = match wake {
                    Wake::Disconnected => {
                        info!(request = %request, %phase, "client disconnected while phase suspended");
                        report.push((phase, status));
                        self.engine.finalize_request(ctx, self.host);
                        self.host.forget(request);
                        return report;
                    }
                    Wake::Event(Some(event)) => event,
                    Wake::Event(None) => break,
                };
                self.dispatch(ctx, event);
                status = ctx.phase_status();
                if self.host.take_advance(request) {
                    break;
                }
            }
            report.push((phase, status));
        }

        self.engine.finalize_request(ctx, self.host);
        self.host.forget(request);
        report
    }

    fn dispatch(&mut self, ctx: &mut RequestContext, event: HostEvent) {
        let outcome = match event {
            HostEvent::Ready { interest, .. } => Some(self.engine.dispatch_event(
                ctx,
                self.host,
                UpstreamEvent::from_interest(interest),
            )),
            HostEvent::Timer { slot, .. } => Some(match UpstreamEvent::from_timer(slot) {
                Some(event) => self.engine.dispatch_event(ctx, self.host, event),
                None => self.engine.dispatch_sleep(ctx, self.host),
            }),
            HostEvent::Resolved { ticket, result, .. } => self
                .engine
                .dispatch_resolved(ctx, self.host, ticket, result),
        };
        debug!(request = %ctx.id(), ?outcome, "host event dispatched");
    }
}
