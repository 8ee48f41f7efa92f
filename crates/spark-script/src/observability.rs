//! 日志安装入口。
//!
//! 库内部只使用 `tracing` 宏；嵌入方若已有自己的 Subscriber，可以不调用这里。

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{SUBSCRIBER_CODE, ScriptError};

/// 安装全局 `fmt + EnvFilter` Subscriber。
///
/// # 教案式说明
/// - **逻辑（How）**：优先读取 `RUST_LOG`；未设置或无法解析时使用 `default_directives`（例如 `"spark_script=debug"`）；
/// - **契约（What）**：进程内已存在全局 Subscriber 时返回错误码 `spark.script.observability.subscriber_failed`；
///   `default_directives` 无法解析时同样返回该错误码。
pub fn init_tracing(default_directives: &str) -> Result<(), ScriptError> {
    let filter = build_env_filter(default_directives)?;
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber).map_err(|err| {
        ScriptError::new(
            SUBSCRIBER_CODE,
            format!("failed to install subscriber: {err}"),
        )
    })
}

fn build_env_filter(default_directives: &str) -> Result<EnvFilter, ScriptError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives).map_err(|err| {
            ScriptError::new(
                SUBSCRIBER_CODE,
                format!("invalid log directives `{default_directives}`: {err}"),
            )
        }),
    }
}
