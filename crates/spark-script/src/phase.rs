//! # phase：阶段种类与阶段入口
//!
//! ## 角色定位（Why）
//! - 阶段是封闭集合，例程名前缀、是否重置请求状态、是否允许挂起都由查表得到，不做字符串比较；
//! - 阶段入口把“取片段 → 至多编译一次 → 交给协程控制器”串成一个调用。
//!
//! ## 契约（What）
//! - location 未声明该阶段的片段，或片段编译失败：返回 `Declined`；
//! - rewrite/access/content 入口先把阶段状态置为 `Done`、请求状态置为 `Declined`；
//! - log 与过滤阶段不能停留在挂起态：例程挂起时单元被释放并以 `Done` 返回。

use std::fmt;

use tracing::{debug, warn};

use crate::config::LocationScope;
use crate::context::RequestContext;
use crate::coroutine::ScriptEngine;
use crate::host::EventHost;
use crate::interp::Interpreter;
use crate::status::PhaseStatus;

/// 流水线阶段。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PhaseKind {
    Rewrite,
    Access,
    Content,
    Log,
    HeaderFilter,
    BodyFilter,
}

struct PhaseTraits {
    prefix: &'static str,
    resets_request_status: bool,
    may_suspend: bool,
}

const TRAITS: [PhaseTraits; 6] = [
    PhaseTraits {
        prefix: "rewrite",
        resets_request_status: true,
        may_suspend: true,
    },
    PhaseTraits {
        prefix: "access",
        resets_request_status: true,
        may_suspend: true,
    },
    PhaseTraits {
        prefix: "content",
        resets_request_status: true,
        may_suspend: true,
    },
    PhaseTraits {
        prefix: "log",
        resets_request_status: false,
        may_suspend: false,
    },
    PhaseTraits {
        prefix: "header_filter",
        resets_request_status: false,
        may_suspend: false,
    },
    PhaseTraits {
        prefix: "body_filter",
        resets_request_status: false,
        may_suspend: false,
    },
];

impl PhaseKind {
    /// 声明顺序。
    pub const ALL: [PhaseKind; 6] = [
        PhaseKind::Rewrite,
        PhaseKind::Access,
        PhaseKind::Content,
        PhaseKind::Log,
        PhaseKind::HeaderFilter,
        PhaseKind::BodyFilter,
    ];

    /// 一次请求中阶段的执行顺序。
    pub const PIPELINE: [PhaseKind; 6] = [
        PhaseKind::Rewrite,
        PhaseKind::Access,
        PhaseKind::Content,
        PhaseKind::HeaderFilter,
        PhaseKind::BodyFilter,
        PhaseKind::Log,
    ];

    fn traits(self) -> &'static PhaseTraits {
        &TRAITS[self as usize]
    }

    /// 编译后例程名的前缀。
    pub fn routine_prefix(self) -> &'static str {
        self.traits().prefix
    }

    pub fn resets_request_status(self) -> bool {
        self.traits().resets_request_status
    }

    pub fn may_suspend(self) -> bool {
        self.traits().may_suspend
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routine_prefix())
    }
}

impl<I: Interpreter> ScriptEngine<I> {
    /// 阶段入口：运行 `location` 在 `phase` 上声明的片段。
    pub fn run_phase(
        &mut self,
        ctx: &mut RequestContext,
        host: &mut dyn EventHost,
        location: &LocationScope,
        phase: PhaseKind,
    ) -> PhaseStatus {
        let request = ctx.id();
        let Some(fragment) = location.fragment(phase) else {
            return PhaseStatus::Declined;
        };

        if phase.resets_request_status() {
            ctx.phase_status = PhaseStatus::Done;
            ctx.request_status = PhaseStatus::Declined;
        }

        let Some(routine) = self.fragments.routine_for(fragment, &mut self.adapter) else {
            debug!(request = %request, %phase, fragment = %fragment.id(), "phase declined: fragment did not compile");
            return PhaseStatus::Declined;
        };

        ctx.enter_phase(phase);
        debug!(request = %request, %phase, routine = %routine, "entering phase");
        let status = self.create(ctx, host, &routine);

        if status.is_suspended() && !phase.may_suspend() {
            warn!(request = %request, %phase, "phase routine cannot suspend in this phase; discarding it");
            self.discard_unit(ctx, host);
            ctx.phase_status = PhaseStatus::Done;
            return PhaseStatus::Done;
        }
        status
    }
}
