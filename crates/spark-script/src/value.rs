//! 解释器边界上流转的值。
//!
//! 宿主不解释脚本值，只需要识别三件事：可挂起单元句柄、按引用传递的单元格，以及真值判断
//! （用于“是否仍有工作”的查询结果）。其余形态保持最小集合。

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

/// 可挂起执行单元的不透明句柄。
///
/// 句柄由解释器分配，宿主只负责保存与释放，从不跨请求共享。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandleId(u64);

impl HandleId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// 按引用传递的单元格。单线程模型下使用 `Rc<RefCell<_>>` 即可。
pub type ValueRef = Rc<RefCell<ScriptValue>>;

/// 脚本值的宿主可见形态。
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Bytes),
    /// 可挂起单元：例程声明自身可迭代时的返回值。
    Handle(HandleId),
    /// 引用单元格；按值绑定时会被解引用。
    Ref(ValueRef),
}

impl ScriptValue {
    /// 构造新的引用单元格。
    pub fn reference(value: ScriptValue) -> Self {
        ScriptValue::Ref(Rc::new(RefCell::new(value)))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ScriptValue::Ref(_))
    }

    /// 解开一层引用，返回被引用值的副本；非引用值原样返回。
    pub fn deref_value(&self) -> ScriptValue {
        match self {
            ScriptValue::Ref(cell) => cell.borrow().clone(),
            other => other.clone(),
        }
    }

    pub fn as_handle(&self) -> Option<HandleId> {
        match self {
            ScriptValue::Handle(handle) => Some(*handle),
            _ => None,
        }
    }

    /// 宽松真值判断，与脚本语言对 `valid()` 返回值的解读保持一致。
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::Null => false,
            ScriptValue::Bool(flag) => *flag,
            ScriptValue::Int(n) => *n != 0,
            ScriptValue::Str(s) => !(s.is_empty() || s == "0"),
            ScriptValue::Bytes(b) => !b.is_empty(),
            ScriptValue::Handle(_) => true,
            ScriptValue::Ref(cell) => cell.borrow().is_truthy(),
        }
    }

    /// 类型名，用于诊断文案。
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Str(_) => "string",
            ScriptValue::Bytes(_) => "bytes",
            ScriptValue::Handle(_) => "generator",
            ScriptValue::Ref(_) => "reference",
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Str(value.to_owned())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::Str(value)
    }
}

impl From<Bytes> for ScriptValue {
    fn from(value: Bytes) -> Self {
        ScriptValue::Bytes(value)
    }
}
