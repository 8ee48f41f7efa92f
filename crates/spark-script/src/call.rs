//! # CallAdapter：宿主到解释器的调用桥
//!
//! ## 角色定位（Why）
//! - 把“例程名（或挂起单元上的方法名）+ 位置/命名实参”翻译为一次解释器调用；
//! - 解释器故障在此被截获：转换为 [`CallError`] 返回值，同时把 [`Fault`] 放入故障队列，
//!   由宿主的告警通道稍后统一上报，绝不以 panic 穿越宿主调用栈。
//!
//! ## 调用流程（How）
//! 1. 故障队列非空时拒绝调用，避免在不稳定的执行器状态上继续运行；
//! 2. 通过 [`Interpreter::signature`] 校验可调用性；
//! 3. 按签名绑定实参（按值 / 按引用 / 命名 / 可变参数），缺口使用默认值补齐；
//! 4. 调用栈为空时先压入合成的顶层帧，执行后无条件恢复到调用前的深度；
//! 5. 执行故障入队并返回 [`CallError::Faulted`]。
//!
//! ## 风险提示（Trade-offs）
//! - 故障队列需要由控制器在每次操作结束后调用 [`CallAdapter::report_faults`] 排空，
//!   否则后续调用都会被拒绝。

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::{CallError, Fault, FaultKind};
use crate::interp::{Argument, CallFrame, CallTarget, Interpreter, PassMode, RoutineSignature};
use crate::scope::ScriptScope;
use crate::value::{HandleId, ScriptValue};

const SYNTHETIC_FRAME: &str = "{main}";

#[derive(Clone, Debug, Eq, PartialEq)]
struct FrameRecord {
    routine: String,
    synthetic: bool,
}

/// 调用适配器，独占解释器实例。
pub struct CallAdapter<I> {
    interp: I,
    frames: Vec<FrameRecord>,
    faults: VecDeque<Fault>,
}

impl<I: Interpreter> CallAdapter<I> {
    pub fn new(interp: I) -> Self {
        Self {
            interp,
            frames: Vec::new(),
            faults: VecDeque::new(),
        }
    }

    pub fn interpreter(&self) -> &I {
        &self.interp
    }

    pub fn interpreter_mut(&mut self) -> &mut I {
        &mut self.interp
    }

    /// 当前调用栈深度；调用结束后总是回到调用前的值。
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// 正在执行的例程名；合成帧不计入。
    pub fn current_routine(&self) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .find(|frame| !frame.synthetic)
            .map(|frame| frame.routine.as_str())
    }

    /// 尚未上报的故障数量。
    pub fn pending_faults(&self) -> usize {
        self.faults.len()
    }

    /// 调用目标并返回结果。
    ///
    /// # 契约说明（What）
    /// - **成功**：返回解释器产生的值；
    /// - **失败**：返回 [`CallError`]，对应故障（若有）已入队；
    /// - **后置条件**：无论成功与否，调用栈深度恢复到调用前。
    pub fn call(
        &mut self,
        target: &CallTarget,
        args: Vec<Argument>,
        scope: &mut ScriptScope<'_>,
    ) -> Result<ScriptValue, CallError> {
        if !self.faults.is_empty() {
            return Err(CallError::FaultPending);
        }

        let signature = match self.interp.signature(target) {
            Ok(signature) => signature,
            Err(fault) => {
                let reason = fault.message().to_owned();
                self.faults.push_back(fault);
                return Err(CallError::Uncallable {
                    target: target.to_string(),
                    reason,
                });
            }
        };

        if signature.is_deprecated() {
            warn!(
                routine = signature.name(),
                "function {}() is deprecated",
                signature.name()
            );
        }

        let mut frame = match bind_arguments(&signature, args) {
            Ok(frame) => frame,
            Err(fault) => {
                self.faults.push_back(fault.clone());
                return Err(CallError::Binding {
                    target: target.to_string(),
                    fault,
                });
            }
        };

        let depth = self.frames.len();
        if depth == 0 {
            self.frames.push(FrameRecord {
                routine: SYNTHETIC_FRAME.to_owned(),
                synthetic: true,
            });
        }
        self.frames.push(FrameRecord {
            routine: signature.name().to_owned(),
            synthetic: false,
        });
        frame.set_depth(self.frames.len());

        let result = self.interp.invoke(target, &frame, scope);
        self.frames.truncate(depth);

        result.map_err(|fault| {
            self.faults.push_back(fault.clone());
            CallError::Faulted {
                target: target.to_string(),
                fault,
            }
        })
    }

    /// 编译片段为具名例程。编译故障直接上报，不进入故障队列。
    pub fn compile(&mut self, routine: &str, source: &str) -> Result<(), Fault> {
        self.interp.compile(routine, source).inspect_err(|fault| {
            warn!(routine, error = %fault, "script fragment failed to compile");
        })
    }

    /// 释放挂起单元。
    pub fn release(&mut self, handle: HandleId) {
        if self.interp.release(handle) {
            debug!(%handle, "suspended unit released");
        }
    }

    /// 排空故障队列并通过告警通道输出，返回上报数量。
    pub fn report_faults(&mut self, request: impl std::fmt::Display) -> usize {
        let mut reported = 0;
        while let Some(fault) = self.faults.pop_front() {
            match fault.kind() {
                FaultKind::Runtime => {
                    warn!(request = %request, "uncaught script fault: {}", fault.message())
                }
                _ => warn!(request = %request, "script call failed: {}", fault.message()),
            }
            reported += 1;
        }
        reported
    }
}

/// 按签名绑定实参，生成调用帧。
fn bind_arguments(signature: &RoutineSignature, args: Vec<Argument>) -> Result<CallFrame, Fault> {
    let params = signature.params();
    let mut slots: Vec<Option<ScriptValue>> = vec![None; params.len()];
    let mut extra_positional = Vec::new();
    let mut extra_named: Vec<(String, ScriptValue)> = Vec::new();
    let mut next_position = 0;
    let mut seen_named = false;

    for arg in args {
        match arg {
            Argument::Positional(value) => {
                if seen_named {
                    return Err(Fault::binding(
                        "cannot use positional argument after named argument",
                    ));
                }
                if let Some(param) = params.get(next_position) {
                    slots[next_position] =
                        Some(pass(signature, next_position, param.mode(), value));
                } else if signature.is_variadic() {
                    extra_positional.push(value.deref_value());
                } else {
                    return Err(Fault::binding(format!(
                        "too many arguments to function {}(), {} expected",
                        signature.name(),
                        params.len()
                    )));
                }
                next_position += 1;
            }
            Argument::Named(name, value) => {
                seen_named = true;
                if let Some(index) = signature.position_of(&name) {
                    if slots[index].is_some() {
                        return Err(overwrites(&name));
                    }
                    slots[index] = Some(pass(signature, index, params[index].mode(), value));
                } else if signature.is_variadic() {
                    if extra_named.iter().any(|(existing, _)| *existing == name) {
                        return Err(overwrites(&name));
                    }
                    extra_named.push((name, value.deref_value()));
                } else {
                    return Err(Fault::binding(format!("unknown named parameter ${name}")));
                }
            }
        }
    }

    let mut bound = Vec::with_capacity(params.len());
    for (slot, param) in slots.into_iter().zip(params) {
        match slot.or_else(|| param.default_value().cloned()) {
            Some(value) => bound.push(value),
            None => {
                return Err(Fault::binding(format!(
                    "{}(): argument ${} not passed",
                    signature.name(),
                    param.name()
                )));
            }
        }
    }

    Ok(CallFrame::new(
        signature.name().to_owned(),
        bound,
        extra_positional,
        extra_named,
    ))
}

fn pass(
    signature: &RoutineSignature,
    index: usize,
    mode: PassMode,
    value: ScriptValue,
) -> ScriptValue {
    match mode {
        PassMode::Reference if !value.is_reference() => {
            warn!(
                "{}(): argument #{} (${}) must be passed by reference, value given",
                signature.name(),
                index + 1,
                signature.params()[index].name()
            );
            value
        }
        PassMode::Reference => value,
        PassMode::Value => value.deref_value(),
    }
}

fn overwrites(name: &str) -> Fault {
    Fault::binding(format!(
        "named parameter ${name} overwrites previous argument"
    ))
}
