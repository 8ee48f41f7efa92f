//! # coroutine：阶段协程控制器
//!
//! ## 角色定位（Why）
//! - 阶段例程可能在套接字原语返回 `Again` 时挂起；控制器负责创建挂起单元、在每个事件后恰好恢复一次，
//!   并在请求结束时无条件回收；
//! - 解释器故障在此边界被吸收并转换为阶段状态，绝不穿越宿主调用栈。
//!
//! ## 生命周期（What）
//! - `create`：调用例程；结果是挂起单元且未耗尽时记为 `Suspended`，否则 `Done`；
//! - `resume`：`next` 一次，再以 `valid` 查询；耗尽即释放单元、记为 `Done` 并通知宿主推进流水线；
//! - `exit`：释放单元、睡眠定时器与上游连接，可重复调用。
//!
//! ## 风险提示（Trade-offs）
//! - 请求结束后的恢复在 `next` 前后各检查一次；检测到时只记录日志并返回 `Aborted`，清理交给 `exit`，
//!   避免同一单元被释放两次。

use tracing::{debug, error, warn};

use crate::call::CallAdapter;
use crate::config::{ConfigScope, SocketConfig};
use crate::context::RequestContext;
use crate::error::{CallError, ConfigError};
use crate::fragment::FragmentCache;
use crate::host::{EventHost, TimerSlot};
use crate::interp::{CallTarget, Interpreter, IterMethod};
use crate::scope::ScriptScope;
use crate::status::{PhaseStatus, ResumeOutcome};
use crate::upstream::ops;
use crate::value::ScriptValue;

/// 脚本引擎：独占解释器（经由调用适配器）、片段缓存与套接字参数。
///
/// 同一引擎实例服务于共享同一配置作用域的全部请求；单线程使用。
pub struct ScriptEngine<I> {
    pub(crate) adapter: CallAdapter<I>,
    pub(crate) fragments: FragmentCache,
    pub(crate) socket: SocketConfig,
}

impl<I: Interpreter> ScriptEngine<I> {
    /// 以给定套接字参数创建引擎；参数先经过 [`SocketConfig::validate`]。
    pub fn new(interp: I, socket: SocketConfig) -> Result<Self, ConfigError> {
        socket.validate()?;
        Ok(Self::with_socket(interp, socket))
    }

    /// 以配置作用域的套接字参数创建引擎。作用域在加载时已校验过这些参数。
    pub fn from_scope(interp: I, scope: &ConfigScope) -> Self {
        Self::with_socket(interp, scope.socket().clone())
    }

    fn with_socket(interp: I, socket: SocketConfig) -> Self {
        Self {
            adapter: CallAdapter::new(interp),
            fragments: FragmentCache::new(),
            socket,
        }
    }

    /// 在处理请求之前编译作用域内的全部片段，返回编译失败的数量。
    ///
    /// 编译故障在这里上报一次；之后引用同一片段的请求直接判定为 `Declined`。
    pub fn precompile(&mut self, scope: &ConfigScope) -> usize {
        let mut failed = 0;
        for location in scope.locations() {
            for fragment in location.fragments() {
                if self
                    .fragments
                    .routine_for(fragment, &mut self.adapter)
                    .is_none()
                {
                    failed += 1;
                }
            }
        }
        failed
    }

    pub fn socket_config(&self) -> &SocketConfig {
        &self.socket
    }

    pub fn interpreter(&self) -> &I {
        self.adapter.interpreter()
    }

    pub fn interpreter_mut(&mut self) -> &mut I {
        self.adapter.interpreter_mut()
    }

    pub fn adapter(&self) -> &CallAdapter<I> {
        &self.adapter
    }

    pub fn fragments(&self) -> &FragmentCache {
        &self.fragments
    }

    fn call(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
        target: CallTarget,
    ) -> Result<ScriptValue, CallError> {
        let mut scope = ScriptScope::new(ctx, host, &self.socket);
        self.adapter.call(&target, Vec::new(), &mut scope)
    }

    /// 运行阶段例程，返回并记录阶段状态。
    pub fn create(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
        routine: &str,
    ) -> PhaseStatus {
        let request = ctx.id();
        if let Some(stale) = ctx.unit.take() {
            warn!(request = %request, unit = %stale, "releasing stale suspended unit before create");
            self.adapter.release(stale);
            host.del_timer(request, TimerSlot::Sleep);
        }

        let status = match self.call(ctx, host, CallTarget::routine(routine)) {
            Ok(value) => match value.as_handle() {
                Some(handle) => {
                    ctx.unit = Some(handle);
                    ctx.stats.units_created += 1;
                    match self.call(ctx, host, CallTarget::iter(handle, IterMethod::Valid)) {
                        Ok(valid) if valid.is_truthy() => PhaseStatus::Suspended,
                        Ok(_) => {
                            self.release_unit(ctx);
                            PhaseStatus::Done
                        }
                        Err(err) => {
                            debug!(request = %request, error = %err, "valid() failed on new unit");
                            self.release_unit(ctx);
                            PhaseStatus::Done
                        }
                    }
                }
                None => PhaseStatus::Done,
            },
            Err(err) => {
                debug!(request = %request, routine, error = %err, "phase routine failed");
                PhaseStatus::Done
            }
        };

        self.adapter.report_faults(request);
        ctx.phase_status = status;
        debug!(request = %request, routine, %status, "phase routine created");
        status
    }

    /// 恢复挂起单元一次。
    pub fn resume(&mut self, ctx: &mut RequestContext, host: &mut dyn EventHost) -> ResumeOutcome {
        let request = ctx.id();
        ctx.stats.resumes += 1;

        let Some(handle) = ctx.unit else {
            if ctx.has_upstream() {
                debug!(request = %request, "resume without suspended unit; discarding upstream");
                ops::close(ctx, host);
            }
            return ResumeOutcome::NoUnit;
        };
        if ctx.end_of_request {
            error!(request = %request, "resume after end of request");
            return ResumeOutcome::Aborted;
        }

        let outcome = match self.call(ctx, host, CallTarget::iter(handle, IterMethod::Next)) {
            Err(err) => self.fault_in_resume(ctx, host, err),
            Ok(_) if ctx.end_of_request => {
                error!(request = %request, "resume after end of request");
                ResumeOutcome::Aborted
            }
            Ok(_) => match self.call(ctx, host, CallTarget::iter(handle, IterMethod::Valid)) {
                Ok(valid) if valid.is_truthy() => ResumeOutcome::Suspended,
                Ok(_) => {
                    self.release_unit(ctx);
                    host.run_phases(request);
                    ResumeOutcome::Done
                }
                Err(err) => self.fault_in_resume(ctx, host, err),
            },
        };

        self.adapter.report_faults(request);
        if let Some(status) = outcome.phase_status() {
            ctx.phase_status = status;
        }
        debug!(request = %request, ?outcome, "unit resumed");
        outcome
    }

    fn fault_in_resume(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
        err: CallError,
    ) -> ResumeOutcome {
        let request = ctx.id();
        debug!(request = %request, error = %err, "suspended unit faulted");
        self.release_unit(ctx);
        host.run_phases(request);
        ResumeOutcome::Faulted
    }

    /// 强制释放挂起单元、睡眠定时器与上游连接，然后通知宿主推进流水线。重复调用是安全的。
    pub fn exit(&mut self, ctx: &mut RequestContext, host: &mut dyn EventHost) {
        self.discard_unit(ctx, host);
        host.run_phases(ctx.id());
    }

    /// 请求结束（正常完成或客户端断开）：标记结束、封口输出链，再执行 `exit`。
    pub fn finalize_request(&mut self, ctx: &mut RequestContext, host: &mut dyn EventHost) {
        ctx.mark_end_of_request();
        ctx.output_mut().mark_last();
        self.exit(ctx, host);
    }

    /// 丢弃挂起单元及其仍在等待的全部唤醒源。
    pub(crate) fn discard_unit(&mut self, ctx: &mut RequestContext, host: &mut dyn EventHost) {
        self.release_unit(ctx);
        host.del_timer(ctx.id(), TimerSlot::Sleep);
        ops::close(ctx, host);
    }

    pub(crate) fn release_unit(&mut self, ctx: &mut RequestContext) {
        if let Some(handle) = ctx.unit.take() {
            self.adapter.release(handle);
        }
    }
}
