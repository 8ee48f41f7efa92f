//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 统一描述脚本桥接层可能出现的四类故障：编译、调用、网络与超时、协议误用；
//! - 所有故障在 `CallAdapter` / `ScriptEngine` 边界被转换为状态码，本模块只负责承载信息。
//!
//! ## 设计要求（What）
//! - 网络侧错误沿用传输层的 `OperationKind` 约定：稳定错误码 + 默认文案 + 错误分类；
//! - 解释器侧故障以 [`Fault`] 表示，可以排队等待宿主的错误上报通道统一输出；
//! - 所有类型派生 `thiserror::Error`，保证可通过 `?` 传播且与 `std::error::Error` 兼容。

use std::borrow::Cow;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 错误的主要处置策略。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCategory {
    /// 超时：对本次操作是终态，不自动重试。
    Timeout,
    /// 可由脚本自行决定是否重试（对端拒绝、连接重置等）。
    Retryable,
    /// 不可恢复。
    NonRetryable,
    /// 调用方违反了原语的使用顺序，例如未连接即发送。
    ProtocolViolation,
}

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "spark.script.upstream.resolve_failed",
    message: "upstream resolve",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.script.upstream.connect_failed",
    message: "upstream connect",
};
pub(crate) const SEND: OperationKind = OperationKind {
    code: "spark.script.upstream.send_failed",
    message: "upstream send",
};
pub(crate) const RECV: OperationKind = OperationKind {
    code: "spark.script.upstream.recv_failed",
    message: "upstream recv",
};
pub(crate) const ARM: OperationKind = OperationKind {
    code: "spark.script.upstream.arm_failed",
    message: "upstream event registration",
};

pub(crate) const TIMEOUT_CODE: &str = "spark.script.upstream.timeout";
pub(crate) const NOT_CONNECTED_CODE: &str = "spark.script.upstream.not_connected";
pub(crate) const INVALID_TARGET_CODE: &str = "spark.script.upstream.invalid_target";
pub(crate) const NO_LIVE_UPSTREAM_CODE: &str = "spark.script.upstream.no_live_upstream";
pub(crate) const PEER_DECLINED_CODE: &str = "spark.script.upstream.peer_declined";
pub(crate) const NO_RESOLVER_CODE: &str = "spark.script.upstream.no_resolver";
pub(crate) const PREMATURE_EOF_CODE: &str = "spark.script.upstream.premature_eof";
pub(crate) const SUBSCRIBER_CODE: &str = "spark.script.observability.subscriber_failed";

/// 脚本桥接层的结构化错误。
///
/// # 教案式说明
/// - **意图 (Why)**：网络故障需要被脚本在下一次同步检查时观察到，同时被日志与告警系统按错误码聚合；
/// - **契约 (What)**：`code` 为 `'static` 稳定码值，`message` 面向排障人员，`category` 驱动重试判断，
///   `cause` 保留底层 `io::Error`；
/// - **风险 (Trade-offs)**：`io::Error` 不可克隆，因此该类型同样不可克隆；需要共享时请借用。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ScriptError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    cause: Option<io::Error>,
}

impl ScriptError {
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: ErrorCategory::NonRetryable,
            cause: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_cause(mut self, cause: io::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn is_timeout(&self) -> bool {
        self.category == ErrorCategory::Timeout
    }
}

/// 将 IO 错误映射为脚本层错误，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> ScriptError {
    let category = categorize_io_error(&error);
    ScriptError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_category(category)
        .with_cause(error)
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind) -> ScriptError {
    ScriptError::new(TIMEOUT_CODE, format!("{} timed out", kind.message))
        .with_category(ErrorCategory::Timeout)
}

/// 构造“未连接”错误：脚本在没有存活连接时调用了读写原语。
pub(crate) fn not_connected_error(kind: OperationKind) -> ScriptError {
    ScriptError::new(
        NOT_CONNECTED_CODE,
        format!("{} without a live upstream connection", kind.message),
    )
    .with_category(ErrorCategory::ProtocolViolation)
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// 解释器层故障的种类。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FaultKind {
    /// 片段编译失败。
    Compile,
    /// 目标例程或方法不存在、不可调用。
    Uncallable,
    /// 参数绑定违反例程签名（未知命名参数、命名冲突、位置参数在命名参数之后等）。
    Binding,
    /// 例程执行期间抛出的故障。
    Runtime,
}

/// 解释器层故障，等价于解释器内部的“异常对象”。
///
/// 故障不会穿越宿主调用栈：`CallAdapter` 将其排入故障队列，并向调用方返回 [`CallError`]。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{kind:?} fault: {message}")]
pub struct Fault {
    kind: FaultKind,
    message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Compile, message)
    }

    pub fn uncallable(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Uncallable, message)
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Binding, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Runtime, message)
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// `CallAdapter` 返回的失败。
///
/// 每个变体都意味着调用未成功完成；对应的 [`Fault`]（若有）已进入故障队列。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CallError {
    /// 仍有未上报的故障，拒绝在不稳定的执行器状态下继续调用。
    #[error("call refused while a previous fault is still pending")]
    FaultPending,
    /// 目标不可调用。
    #[error("invalid callback {target}: {reason}")]
    Uncallable { target: String, reason: String },
    /// 参数绑定失败。
    #[error("argument binding failed for {target}: {fault}")]
    Binding { target: String, fault: Fault },
    /// 执行期间出现故障。
    #[error("{target} raised: {fault}")]
    Faulted { target: String, fault: Fault },
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read script fragment `{path}`: {source}")]
    Fragment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
