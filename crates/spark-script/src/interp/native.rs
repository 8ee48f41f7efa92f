//! # NativeInterpreter：以 Rust 状态机充当脚本例程
//!
//! ## 角色定位（Why）
//! - 协程控制器需要一个真实可运行的解释器来验证“创建 / 查询 / 推进 / 释放”的完整链路；
//! - 嵌入式宿主也可以直接以 Rust 闭包编写阶段逻辑，而无需引入完整脚本引擎。
//!
//! ## 模型（What）
//! - **程序（program）**：以字符串键注册的工厂闭包；片段源码（去除首尾空白后）即为程序键；
//! - **例程（routine）**：`compile` 把程序绑定到例程名，例程签名为空参列表；
//!   也可以通过 [`NativeInterpreter::define`] 直接定义带签名的例程；
//! - **协程体**：实现 [`NativeCoroutine`] 的显式状态机，每次 `step` 运行到下一个挂起点（[`Step::Yield`]）
//!   或结束（[`Step::Return`]）。
//!
//! ## 执行语义（How）
//! - 例程返回 [`Invocation::Coroutine`] 时立即运行第一步，再分配句柄；因此 `valid` 只读取标志位，没有副作用；
//! - `next` 对已结束的协程是空操作；任何一步返回故障都会把协程标记为结束。

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Fault;
use crate::interp::{CallFrame, CallTarget, Interpreter, IterMethod, RoutineSignature};
use crate::scope::ScriptScope;
use crate::value::{HandleId, ScriptValue};

/// 协程单步的结果。
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// 在挂起点让出控制权，等待下一次 `next`。
    Yield,
    /// 协程结束，携带返回值。
    Return(ScriptValue),
}

/// 显式状态机形式的协程体。
pub trait NativeCoroutine {
    fn step(&mut self, scope: &mut ScriptScope<'_>) -> Result<Step, Fault>;
}

impl<F> NativeCoroutine for F
where
    F: FnMut(&mut ScriptScope<'_>) -> Result<Step, Fault>,
{
    fn step(&mut self, scope: &mut ScriptScope<'_>) -> Result<Step, Fault> {
        self(scope)
    }
}

/// 例程调用的结果：普通值，或一个可挂起的协程体。
pub enum Invocation {
    Value(ScriptValue),
    Coroutine(Box<dyn NativeCoroutine>),
}

impl Invocation {
    pub fn value(value: impl Into<ScriptValue>) -> Self {
        Invocation::Value(value.into())
    }

    pub fn coroutine<F>(body: F) -> Self
    where
        F: FnMut(&mut ScriptScope<'_>) -> Result<Step, Fault> + 'static,
    {
        Invocation::Coroutine(Box::new(body))
    }
}

type NativeProgram = Rc<dyn Fn(&CallFrame, &mut ScriptScope<'_>) -> Result<Invocation, Fault>>;

struct NativeRoutine {
    signature: RoutineSignature,
    program: NativeProgram,
}

struct Generator {
    body: Box<dyn NativeCoroutine>,
    finished: bool,
}

impl Generator {
    fn advance(&mut self, scope: &mut ScriptScope<'_>) -> Result<(), Fault> {
        if self.finished {
            return Ok(());
        }
        match self.body.step(scope) {
            Ok(Step::Yield) => Ok(()),
            Ok(Step::Return(_)) => {
                self.finished = true;
                Ok(())
            }
            Err(fault) => {
                self.finished = true;
                Err(fault)
            }
        }
    }
}

/// 内置解释器。
#[derive(Default)]
pub struct NativeInterpreter {
    programs: HashMap<String, NativeProgram>,
    routines: HashMap<String, NativeRoutine>,
    generators: HashMap<HandleId, Generator>,
    next_handle: u64,
    compiled: usize,
}

impl NativeInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 `key` 注册程序；片段源码等于该键时即可编译成例程。
    pub fn register_program<F>(&mut self, key: impl Into<String>, program: F)
    where
        F: Fn(&CallFrame, &mut ScriptScope<'_>) -> Result<Invocation, Fault> + 'static,
    {
        self.programs.insert(key.into(), Rc::new(program));
    }

    /// 直接定义带签名的例程，绕过编译步骤。
    pub fn define<F>(&mut self, signature: RoutineSignature, program: F)
    where
        F: Fn(&CallFrame, &mut ScriptScope<'_>) -> Result<Invocation, Fault> + 'static,
    {
        let name = signature.name().to_owned();
        self.routines.insert(
            name,
            NativeRoutine {
                signature,
                program: Rc::new(program),
            },
        );
    }

    /// 成功编译的次数。
    pub fn compiled_count(&self) -> usize {
        self.compiled
    }

    pub fn is_defined(&self, routine: &str) -> bool {
        self.routines.contains_key(routine)
    }

    fn spawn(
        &mut self,
        body: Box<dyn NativeCoroutine>,
        scope: &mut ScriptScope<'_>,
    ) -> Result<ScriptValue, Fault> {
        let mut generator = Generator {
            body,
            finished: false,
        };
        generator.advance(scope)?;
        self.next_handle += 1;
        let handle = HandleId::new(self.next_handle);
        self.generators.insert(handle, generator);
        Ok(ScriptValue::Handle(handle))
    }
}

fn parse_method(method: &str) -> Option<IterMethod> {
    match method {
        "valid" => Some(IterMethod::Valid),
        "next" => Some(IterMethod::Next),
        _ => None,
    }
}

impl Interpreter for NativeInterpreter {
    fn compile(&mut self, routine: &str, source: &str) -> Result<(), Fault> {
        if self.routines.contains_key(routine) {
            return Err(Fault::compile(format!("cannot redeclare {routine}()")));
        }
        let key = source.trim();
        let program = self
            .programs
            .get(key)
            .cloned()
            .ok_or_else(|| Fault::compile(format!("syntax error, unknown program `{key}`")))?;
        self.routines.insert(
            routine.to_owned(),
            NativeRoutine {
                signature: RoutineSignature::new(routine),
                program,
            },
        );
        self.compiled += 1;
        Ok(())
    }

    fn signature(&self, target: &CallTarget) -> Result<RoutineSignature, Fault> {
        match target {
            CallTarget::Routine(name) => self
                .routines
                .get(name)
                .map(|routine| routine.signature.clone())
                .ok_or_else(|| Fault::uncallable(format!("call to undefined function {name}()"))),
            CallTarget::Method { handle, method } => {
                if !self.generators.contains_key(handle) {
                    return Err(Fault::uncallable(format!(
                        "{handle} is not a live generator"
                    )));
                }
                parse_method(method)
                    .map(|method| RoutineSignature::new(format!("Generator::{}", method.name())))
                    .ok_or_else(|| {
                        Fault::uncallable(format!("call to undefined method Generator::{method}()"))
                    })
            }
        }
    }

    fn invoke(
        &mut self,
        target: &CallTarget,
        frame: &CallFrame,
        scope: &mut ScriptScope<'_>,
    ) -> Result<ScriptValue, Fault> {
        match target {
            CallTarget::Routine(name) => {
                let program = self
                    .routines
                    .get(name)
                    .map(|routine| Rc::clone(&routine.program))
                    .ok_or_else(|| {
                        Fault::uncallable(format!("call to undefined function {name}()"))
                    })?;
                match program(frame, scope)? {
                    Invocation::Value(value) => Ok(value),
                    Invocation::Coroutine(body) => self.spawn(body, scope),
                }
            }
            CallTarget::Method { handle, method } => {
                let generator = self.generators.get_mut(handle).ok_or_else(|| {
                    Fault::uncallable(format!("{handle} is not a live generator"))
                })?;
                match parse_method(method) {
                    Some(IterMethod::Valid) => Ok(ScriptValue::Bool(!generator.finished)),
                    Some(IterMethod::Next) => {
                        generator.advance(scope)?;
                        Ok(ScriptValue::Null)
                    }
                    None => Err(Fault::uncallable(format!(
                        "call to undefined method Generator::{method}()"
                    ))),
                }
            }
        }
    }

    fn release(&mut self, handle: HandleId) -> bool {
        self.generators.remove(&handle).is_some()
    }

    fn live_handles(&self) -> usize {
        self.generators.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketConfig;
    use crate::context::RequestContext;
    use crate::error::FaultKind;
    use crate::host::testing::NoopHost;

    fn counting_program(interp: &mut NativeInterpreter, key: &str, yields: u32) {
        interp.register_program(key, move |_, _| {
            let mut remaining = yields;
            Ok(Invocation::coroutine(move |scope| {
                scope.output("tick");
                if remaining == 0 {
                    return Ok(Step::Return(ScriptValue::Null));
                }
                remaining -= 1;
                Ok(Step::Yield)
            }))
        });
    }

    #[test]
    fn compile_binds_registered_program_once() {
        let mut interp = NativeInterpreter::new();
        counting_program(&mut interp, "tick", 0);

        interp.compile("content_a", " tick\n").expect("compile");
        assert!(interp.is_defined("content_a"));
        let err = interp.compile("content_a", "tick").expect_err("redeclare");
        assert_eq!(err.kind(), FaultKind::Compile);
        let err = interp.compile("content_b", "missing").expect_err("unknown");
        assert!(err.message().contains("missing"));
        assert_eq!(interp.compiled_count(), 1);
    }

    #[test]
    fn generators_run_eagerly_and_valid_has_no_side_effects() {
        let mut interp = NativeInterpreter::new();
        counting_program(&mut interp, "tick", 1);
        interp.compile("content_a", "tick").expect("compile");

        let mut ctx = RequestContext::new();
        let mut host = NoopHost::default();
        let socket = SocketConfig::default();
        let mut scope = ScriptScope::new(&mut ctx, &mut host, &socket);

        let frame = CallFrame::default();
        let handle = interp
            .invoke(&CallTarget::routine("content_a"), &frame, &mut scope)
            .expect("invoke")
            .as_handle()
            .expect("generator");
        let valid = CallTarget::iter(handle, IterMethod::Valid);
        for _ in 0..3 {
            assert_eq!(
                interp.invoke(&valid, &frame, &mut scope),
                Ok(ScriptValue::Bool(true))
            );
        }
        interp
            .invoke(
                &CallTarget::iter(handle, IterMethod::Next),
                &frame,
                &mut scope,
            )
            .expect("next");
        assert_eq!(
            interp.invoke(&valid, &frame, &mut scope),
            Ok(ScriptValue::Bool(false))
        );
        drop(scope);
        assert_eq!(ctx.output().chunks(), 2);

        assert!(interp.release(handle));
        assert!(!interp.release(handle));
        assert_eq!(interp.live_handles(), 0);
    }

    #[test]
    fn unknown_methods_are_uncallable() {
        let mut interp = NativeInterpreter::new();
        counting_program(&mut interp, "tick", 1);
        interp.compile("content_a", "tick").expect("compile");
        let mut ctx = RequestContext::new();
        let mut host = NoopHost::default();
        let socket = SocketConfig::default();
        let mut scope = ScriptScope::new(&mut ctx, &mut host, &socket);
        let handle = interp
            .invoke(
                &CallTarget::routine("content_a"),
                &CallFrame::default(),
                &mut scope,
            )
            .expect("invoke")
            .as_handle()
            .expect("generator");

        let target = CallTarget::Method {
            handle,
            method: "rewind".into(),
        };
        let fault = interp.signature(&target).expect_err("uncallable");
        assert_eq!(fault.kind(), FaultKind::Uncallable);
    }
}
