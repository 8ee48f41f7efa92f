//! # interp 模块说明
//!
//! ## 角色定位（Why）
//! - 脚本解释器属于外部协作者：编译、执行与值表示均不由本 crate 负责；
//! - 本模块只声明宿主与解释器之间的最小契约 [`Interpreter`]，以及调用适配层需要的签名描述。
//!
//! ## 契约（What）
//! - 可迭代协议固定为两个方法：`valid`（无副作用的“是否仍有工作”查询）与 `next`（推进到下一个挂起点）；
//! - 解释器通过 [`Fault`] 报告故障，绝不以 panic 穿越宿主调用栈；
//! - 句柄的生命周期由宿主决定：宿主调用 [`Interpreter::release`] 之后解释器必须丢弃对应状态。
//!
//! ## 实现提示（How）
//! - [`native::NativeInterpreter`] 是内置实现，例程体为 Rust 状态机，适合嵌入式场景与测试；
//! - 接入其他脚本引擎时，实现 [`Interpreter`] 即可复用协程控制器与上游套接字层。

pub mod native;

use std::fmt;

use crate::error::Fault;
use crate::scope::ScriptScope;
use crate::value::{HandleId, ScriptValue};

/// 可迭代协议中的方法。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IterMethod {
    /// 查询单元是否仍有工作；不得产生副作用。
    Valid,
    /// 推进单元直到下一个挂起点或结束。
    Next,
}

impl IterMethod {
    pub fn name(self) -> &'static str {
        match self {
            IterMethod::Valid => "valid",
            IterMethod::Next => "next",
        }
    }
}

/// 调用目标：具名例程，或挂起单元上的方法。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum CallTarget {
    Routine(String),
    Method { handle: HandleId, method: String },
}

impl CallTarget {
    pub fn routine(name: impl Into<String>) -> Self {
        CallTarget::Routine(name.into())
    }

    pub fn iter(handle: HandleId, method: IterMethod) -> Self {
        CallTarget::Method {
            handle,
            method: method.name().to_owned(),
        }
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Routine(name) => f.write_str(name),
            CallTarget::Method { handle, method } => write!(f, "{handle}::{method}"),
        }
    }
}

/// 参数的传递方式。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PassMode {
    #[default]
    Value,
    Reference,
}

/// 单个形参的声明。
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    name: String,
    mode: PassMode,
    default: Option<ScriptValue>,
}

impl ParamSpec {
    /// 必填、按值传递的形参。
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: PassMode::Value,
            default: None,
        }
    }

    /// 带默认值的可选形参。
    pub fn optional(name: impl Into<String>, default: ScriptValue) -> Self {
        Self {
            name: name.into(),
            mode: PassMode::Value,
            default: Some(default),
        }
    }

    pub fn by_reference(mut self) -> Self {
        self.mode = PassMode::Reference;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> PassMode {
        self.mode
    }

    pub fn default_value(&self) -> Option<&ScriptValue> {
        self.default.as_ref()
    }
}

/// 例程签名：绑定参数所需的全部信息。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutineSignature {
    name: String,
    params: Vec<ParamSpec>,
    variadic: bool,
    deprecated: bool,
}

impl RoutineSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// 声明为可变参数例程：多余的位置参数与未知命名参数被收集而非拒绝。
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    pub(crate) fn position_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|param| param.name == name)
    }
}

/// 调用方提供的实参。
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    Positional(ScriptValue),
    Named(String, ScriptValue),
}

impl Argument {
    pub fn named(name: impl Into<String>, value: impl Into<ScriptValue>) -> Self {
        Argument::Named(name.into(), value.into())
    }

    pub fn positional(value: impl Into<ScriptValue>) -> Self {
        Argument::Positional(value.into())
    }
}

/// 绑定完成后交给解释器执行的调用帧。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallFrame {
    routine: String,
    args: Vec<ScriptValue>,
    extra_positional: Vec<ScriptValue>,
    extra_named: Vec<(String, ScriptValue)>,
    depth: usize,
}

impl CallFrame {
    pub(crate) fn new(
        routine: String,
        args: Vec<ScriptValue>,
        extra_positional: Vec<ScriptValue>,
        extra_named: Vec<(String, ScriptValue)>,
    ) -> Self {
        Self {
            routine,
            args,
            extra_positional,
            extra_named,
            depth: 0,
        }
    }

    pub(crate) fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub fn routine(&self) -> &str {
        &self.routine
    }

    /// 按声明顺序排列的形参值。
    pub fn args(&self) -> &[ScriptValue] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&ScriptValue> {
        self.args.get(index)
    }

    pub fn extra_positional(&self) -> &[ScriptValue] {
        &self.extra_positional
    }

    pub fn extra_named(&self) -> &[(String, ScriptValue)] {
        &self.extra_named
    }

    /// 本帧在调用栈中的深度；首次进入时包含合成的顶层帧。
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// 宿主与脚本解释器之间的契约。
///
/// # 教案式说明
/// - **意图 (Why)**：协程控制器只依赖“编译 / 签名 / 调用 / 释放”四种能力，其余解释器细节对宿主透明；
/// - **契约 (What)**：
///   - `compile` 将片段源码定义为名为 `routine` 的例程；同名重复定义应返回编译故障；
///   - `signature` 用于可调用性校验与参数绑定，目标不存在时返回 [`FaultKind::Uncallable`](crate::error::FaultKind::Uncallable) 故障；
///   - `invoke` 执行已绑定的调用帧，执行期可通过 `scope` 使用套接字原语；
///   - 例程声明自身可迭代时，`invoke` 返回 [`ScriptValue::Handle`]，之后通过 [`IterMethod`] 驱动；
/// - **风险 (Trade-offs)**：`valid` 必须无副作用，否则控制器的“每事件一次恢复”保证会被破坏。
pub trait Interpreter {
    fn compile(&mut self, routine: &str, source: &str) -> Result<(), Fault>;

    fn signature(&self, target: &CallTarget) -> Result<RoutineSignature, Fault>;

    fn invoke(
        &mut self,
        target: &CallTarget,
        frame: &CallFrame,
        scope: &mut ScriptScope<'_>,
    ) -> Result<ScriptValue, Fault>;

    /// 释放句柄；返回句柄此前是否存活。
    fn release(&mut self, handle: HandleId) -> bool;

    /// 当前存活的句柄数量，供不变量检查使用。
    fn live_handles(&self) -> usize;
}
