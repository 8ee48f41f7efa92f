//! # status 模块说明
//!
//! ## 角色定位（Why）
//! - 集中声明宿主流水线与脚本原语之间交换的全部状态码，替代宿主侧散落的整数返回值；
//! - 区分“阶段状态”（交给宿主流水线）与“I/O 状态”（交给脚本），避免二者在调用点被混用。
//!
//! ## 契约（What）
//! - [`PhaseStatus`]：阶段入口例程与协程控制器对宿主的答复；
//! - [`IoStatus`]：`connect`/`send`/`recv` 等原语的三态结果；
//! - [`PeerRejection`]：对端选择失败的原因，仅用于日志与错误码，不与 `Again` 混淆；
//! - [`ResumeOutcome`]：一次恢复尝试的细分结果，供事件桥接与测试断言使用。

use core::fmt;

/// 阶段状态，对应宿主流水线的推进语义。
///
/// - `Done`：继续下一个阶段；隐式的 ERROR（故障已上报）同样映射为 `Done`，避免请求悬挂；
/// - `Suspended`：将控制权交还宿主，等待 I/O 事件；
/// - `Declined`：本阶段选择不参与（未配置脚本或片段编译失败）。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PhaseStatus {
    #[default]
    Done,
    Suspended,
    Declined,
}

impl PhaseStatus {
    /// 是否需要等待事件后再推进。
    pub fn is_suspended(self) -> bool {
        matches!(self, PhaseStatus::Suspended)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PhaseStatus::Done => "done",
            PhaseStatus::Suspended => "suspended",
            PhaseStatus::Declined => "declined",
        };
        f.write_str(label)
    }
}

/// 套接字原语的三态结果。
///
/// # 教案式说明
/// - **意图 (Why)**：脚本侧只需区分“完成 / 需等待事件 / 致命失败”三种走向；
/// - **契约 (What)**：`Again` 表示操作尚未完成，宿主稍后会投递事件，调用方必须挂起协程；
///   `Error` 表示调用方应中止本次 I/O 并向上呈现失败，不得静默重试；
/// - **风险 (Trade-offs)**：对端选择失败（`Declined`/`Busy`）在此处同样表现为 `Error`，
///   细分原因记录在连接的 `last_error` 中。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IoStatus {
    #[default]
    Ok,
    Again,
    Error,
}

impl IoStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, IoStatus::Ok)
    }

    pub fn is_again(self) -> bool {
        matches!(self, IoStatus::Again)
    }

    pub fn is_error(self) -> bool {
        matches!(self, IoStatus::Error)
    }
}

impl fmt::Display for IoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IoStatus::Ok => "ok",
            IoStatus::Again => "again",
            IoStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// 对端选择被拒绝的原因。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PeerRejection {
    /// 地址被连接池拒绝。
    Declined,
    /// 没有可用的上游对端。
    Busy,
}

/// 一次 `resume` 调用的结果。
///
/// `Suspended`/`Done` 与 [`PhaseStatus`] 一一对应；其余变体描述未进入脚本或进入后被放弃的情形。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResumeOutcome {
    /// 没有可恢复的挂起单元（协议误用或请求已清理），属于安全空操作。
    NoUnit,
    /// 请求已结束，拒绝再次进入脚本；清理交由 `exit` 完成。
    Aborted,
    /// 推进后仍未耗尽，继续等待事件。
    Suspended,
    /// 推进后耗尽，单元已释放。
    Done,
    /// 推进或查询过程中出现故障，单元已释放并按 `Done` 处理。
    Faulted,
}

impl ResumeOutcome {
    /// 将恢复结果映射为宿主可见的阶段状态；`NoUnit`/`Aborted` 不改变阶段状态。
    pub fn phase_status(self) -> Option<PhaseStatus> {
        match self {
            ResumeOutcome::Suspended => Some(PhaseStatus::Suspended),
            ResumeOutcome::Done | ResumeOutcome::Faulted => Some(PhaseStatus::Done),
            ResumeOutcome::NoUnit | ResumeOutcome::Aborted => None,
        }
    }
}
