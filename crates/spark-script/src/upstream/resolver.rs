//! # resolver：目标解析与地址选择
//!
//! ## 角色定位（Why）
//! - 字面地址无需经过解析器往返，直接进入连接阶段（快路径）；
//! - 域名交给宿主的异步解析器，完成后由 [`pick_address`] 选出一个地址并写入连接。
//!
//! ## 接受的目标格式（What）
//! - `host`、`host:port`、`1.2.3.4`、`1.2.3.4:port`、`[::1]:port` 以及不带端口的裸 IPv6 字面量；
//! - 目标中自带的端口优先于调用参数中的端口；
//! - 空目标、非法主机名、端口缺失（为 0）或无法解析的端口一律视为非法目标。

use std::net::{IpAddr, SocketAddr};

use rand::Rng;

use crate::error::{INVALID_TARGET_CODE, ScriptError};

/// 解析后的连接目标。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetAddr {
    /// 字面地址，跳过解析。
    Socket(SocketAddr),
    /// 需要异步解析的主机名。
    Name { host: String, port: u16 },
}

impl TargetAddr {
    /// 解析脚本传入的目标。
    pub fn parse(target: &str, port: u16) -> Result<Self, ScriptError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(invalid(target, "empty target"));
        }

        if let Some(rest) = target.strip_prefix('[') {
            let (literal, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid(target, "unterminated IPv6 literal"))?;
            let ip: IpAddr = literal
                .parse()
                .map_err(|_| invalid(target, "malformed IPv6 literal"))?;
            let port = match tail {
                "" => port,
                _ => parse_port(target, tail.strip_prefix(':'))?,
            };
            return socket(target, ip, port);
        }

        if let Ok(ip) = target.parse::<IpAddr>() {
            return socket(target, ip, port);
        }
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return socket(target, addr.ip(), addr.port());
        }

        let (host, port) = match target.rsplit_once(':') {
            Some((host, raw)) => (host, parse_port(target, Some(raw))?),
            None => (target, port),
        };
        if !is_valid_host(host) {
            return Err(invalid(target, "malformed host name"));
        }
        if port == 0 {
            return Err(invalid(target, "no port"));
        }
        Ok(TargetAddr::Name {
            host: host.to_owned(),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Socket(addr) => addr.port(),
            TargetAddr::Name { port, .. } => *port,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, TargetAddr::Socket(_))
    }
}

/// 在解析结果中选出一个地址并套用端口：单个地址直接使用，多个地址随机选取。
pub fn pick_address<R: Rng>(addrs: &[IpAddr], port: u16, rng: &mut R) -> Option<SocketAddr> {
    let ip = match addrs {
        [] => return None,
        [only] => *only,
        many => many[rng.random_range(0..many.len())],
    };
    Some(SocketAddr::new(ip, port))
}

fn socket(target: &str, ip: IpAddr, port: u16) -> Result<TargetAddr, ScriptError> {
    if port == 0 {
        return Err(invalid(target, "no port"));
    }
    Ok(TargetAddr::Socket(SocketAddr::new(ip, port)))
}

fn parse_port(target: &str, raw: Option<&str>) -> Result<u16, ScriptError> {
    raw.and_then(|raw| raw.parse::<u16>().ok())
        .ok_or_else(|| invalid(target, "invalid port"))
}

fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'))
}

fn invalid(target: &str, reason: &str) -> ScriptError {
    ScriptError::new(
        INVALID_TARGET_CODE,
        format!("invalid upstream target \"{target}\": {reason}"),
    )
}
