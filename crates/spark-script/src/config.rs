//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 以 TOML 描述套接字参数与各 location 的阶段片段，替代宿主配置指令；
//! - 加载时一次性读取文件片段并分配稳定标识，请求处理期间不再触碰文件系统。
//!
//! ## 格式（What）
//! ```toml
//! [socket]
//! connect_timeout_ms = 5000   # 0 表示使用默认值 60000
//! read_timeout_ms = 0
//! write_timeout_ms = 0
//! buffer_size = 4096          # 必须大于 0
//! log_socket_errors = true
//!
//! [[location]]
//! name = "/api"
//! access = { inline = "check_token" }
//! content = { file = "scripts/api.src" }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::fragment::{FragmentSource, PhaseCodeFragment};
use crate::phase::PhaseKind;

/// 超时未配置（为 0）时使用的默认值。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);
/// 默认接收缓冲区大小。
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// 套接字参数。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SocketConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub buffer_size: usize,
    /// 是否以 error 级别记录套接字超时。
    pub log_socket_errors: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            log_socket_errors: true,
        }
    }
}

fn timeout_or_default(ms: u64) -> Duration {
    if ms == 0 {
        DEFAULT_TIMEOUT
    } else {
        Duration::from_millis(ms)
    }
}

impl SocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        timeout_or_default(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        timeout_or_default(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        timeout_or_default(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "socket.buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// 单个 location 的阶段片段声明。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default)]
    pub rewrite: Option<FragmentSource>,
    #[serde(default)]
    pub access: Option<FragmentSource>,
    #[serde(default)]
    pub content: Option<FragmentSource>,
    #[serde(default)]
    pub log: Option<FragmentSource>,
    #[serde(default)]
    pub header_filter: Option<FragmentSource>,
    #[serde(default)]
    pub body_filter: Option<FragmentSource>,
}

impl LocationConfig {
    pub fn source(&self, phase: PhaseKind) -> Option<&FragmentSource> {
        match phase {
            PhaseKind::Rewrite => self.rewrite.as_ref(),
            PhaseKind::Access => self.access.as_ref(),
            PhaseKind::Content => self.content.as_ref(),
            PhaseKind::Log => self.log.as_ref(),
            PhaseKind::HeaderFilter => self.header_filter.as_ref(),
            PhaseKind::BodyFilter => self.body_filter.as_ref(),
        }
    }
}

/// 顶层配置。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptConfig {
    pub socket: SocketConfig,
    #[serde(rename = "location")]
    pub locations: Vec<LocationConfig>,
    /// 相对路径片段的基准目录；`from_path` 设置为配置文件所在目录。
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl ScriptConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ScriptConfig = toml::from_str(text)?;
        config.socket.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// 加载完成的 location：每个阶段至多一个片段。
#[derive(Clone, Debug, Default)]
pub struct LocationScope {
    name: String,
    fragments: HashMap<PhaseKind, PhaseCodeFragment>,
}

impl LocationScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fragments: HashMap::new(),
        }
    }

    /// 以内联源码设置阶段片段。
    pub fn with_fragment(mut self, phase: PhaseKind, source: impl Into<String>) -> Self {
        self.fragments
            .insert(phase, PhaseCodeFragment::new(phase, source));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fragment(&self, phase: PhaseKind) -> Option<&PhaseCodeFragment> {
        self.fragments.get(&phase)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &PhaseCodeFragment> {
        self.fragments.values()
    }
}

/// 配置作用域：加载期确定的全部片段，在其生命周期内被所有请求共享。
#[derive(Clone, Debug, Default)]
pub struct ConfigScope {
    socket: SocketConfig,
    locations: Vec<LocationScope>,
}

impl ConfigScope {
    /// 校验配置、读取文件片段并为每个片段分配标识。
    pub fn load(config: &ScriptConfig) -> Result<Self, ConfigError> {
        config.socket.validate()?;

        let mut seen = HashSet::new();
        let mut locations = Vec::with_capacity(config.locations.len());
        for location in &config.locations {
            if !seen.insert(location.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate location `{}`",
                    location.name
                )));
            }

            let mut scope = LocationScope::new(location.name.clone());
            for phase in PhaseKind::ALL {
                let Some(source) = location.source(phase) else {
                    continue;
                };
                let fragment = match source {
                    FragmentSource::Inline(code) => PhaseCodeFragment::new(phase, code.clone()),
                    FragmentSource::File(path) => {
                        let path = config.resolve_path(path);
                        let code =
                            fs::read_to_string(&path).map_err(|source| ConfigError::Fragment {
                                path: path.clone(),
                                source,
                            })?;
                        PhaseCodeFragment::new(phase, code).with_origin(path)
                    }
                };
                scope.fragments.insert(phase, fragment);
            }
            locations.push(scope);
        }

        Ok(Self {
            socket: config.socket.clone(),
            locations,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::load(&ScriptConfig::from_toml_str(text)?)
    }

    pub fn socket(&self) -> &SocketConfig {
        &self.socket
    }

    pub fn location(&self, name: &str) -> Option<&LocationScope> {
        self.locations.iter().find(|location| location.name == name)
    }

    pub fn locations(&self) -> &[LocationScope] {
        &self.locations
    }
}
