//! # fragment 模块说明
//!
//! ## 角色定位（Why）
//! - 阶段代码片段在配置加载时获得稳定标识，之后所有共享该配置的请求都复用同一个已编译例程；
//! - 编译属于昂贵操作，且重复定义同名例程在解释器中是错误，因此必须“至多编译一次”。
//!
//! ## 契约（What）
//! - [`FragmentId`]：对“阶段标签 + 源码”做 SHA-256，取前 16 字节；同一阶段的相同源码共享标识；
//! - [`FragmentCache`]：以标识为键记录编译结果；编译失败同样被记住，后续请求直接判定为 `Declined`，
//!   故障只在首次编译时上报一次。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::call::CallAdapter;
use crate::interp::Interpreter;
use crate::phase::PhaseKind;

/// 片段的稳定标识。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FragmentId([u8; 16]);

impl FragmentId {
    pub fn derive(phase: PhaseKind, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(phase.routine_prefix().as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// 片段来源：内联源码或外部文件。
///
/// TOML 中写作 `{ inline = "..." }` 或 `{ file = "path" }`。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FragmentSource {
    Inline(String),
    File(PathBuf),
}

/// 已加载的阶段代码片段。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseCodeFragment {
    id: FragmentId,
    phase: PhaseKind,
    source: String,
    origin: Option<PathBuf>,
}

impl PhaseCodeFragment {
    pub fn new(phase: PhaseKind, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: FragmentId::derive(phase, &source),
            phase,
            source,
            origin: None,
        }
    }

    pub(crate) fn with_origin(mut self, origin: PathBuf) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 片段来自文件时的路径。
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// 编译后的例程名：`<阶段前缀>_<片段标识>`。
    pub fn routine_name(&self) -> String {
        format!("{}_{}", self.phase.routine_prefix(), self.id)
    }
}

#[derive(Clone, Debug)]
enum CacheEntry {
    Compiled(Rc<str>),
    Failed,
}

/// 进程级编译缓存。
#[derive(Debug, Default)]
pub struct FragmentCache {
    entries: HashMap<FragmentId, CacheEntry>,
}

impl FragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回片段对应的例程名，必要时先编译。
    ///
    /// # 契约说明（What）
    /// - 首次遇到某标识时编译并记录结果，此后不再调用解释器；
    /// - 编译失败返回 `None`，且后续调用同样返回 `None`。
    pub fn routine_for<I: Interpreter>(
        &mut self,
        fragment: &PhaseCodeFragment,
        adapter: &mut CallAdapter<I>,
    ) -> Option<Rc<str>> {
        match self.entries.entry(fragment.id()) {
            Entry::Occupied(entry) => match entry.get() {
                CacheEntry::Compiled(routine) => Some(Rc::clone(routine)),
                CacheEntry::Failed => None,
            },
            Entry::Vacant(slot) => {
                let routine: Rc<str> = fragment.routine_name().into();
                match adapter.compile(&routine, fragment.source()) {
                    Ok(()) => {
                        slot.insert(CacheEntry::Compiled(Rc::clone(&routine)));
                        Some(routine)
                    }
                    Err(_) => {
                        slot.insert(CacheEntry::Failed);
                        None
                    }
                }
            }
        }
    }

    pub fn is_compiled(&self, id: FragmentId) -> bool {
        matches!(self.entries.get(&id), Some(CacheEntry::Compiled(_)))
    }

    /// 已记录（成功或失败）的片段数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
