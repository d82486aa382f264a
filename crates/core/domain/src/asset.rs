//! 设备与点位模型。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 枚举文本解析错误。
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// 设备协议类型（封闭集合）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// BACnet/IP（对象 + 属性寻址）
    Bacnet,
    /// Modbus TCP（寄存器寻址）
    Modbus,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bacnet => "bacnet",
            Self::Modbus => "modbus",
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bacnet" | "bacnet_ip" | "bacnet/ip" => Ok(Self::Bacnet),
            "modbus" | "modbus_tcp" | "modbus/tcp" => Ok(Self::Modbus),
            _ => Err(ParseError::new("protocol", s)),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 历史记录模式。
///
/// - `Cov`：死区 + 心跳过滤后记录
/// - `Interval`：每次成功读取都记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggingMode {
    #[default]
    Cov,
    Interval,
}

impl LoggingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cov => "COV",
            Self::Interval => "INTERVAL",
        }
    }
}

impl FromStr for LoggingMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COV" | "" => Ok(Self::Cov),
            "INTERVAL" => Ok(Self::Interval),
            _ => Err(ParseError::new("logging mode", s)),
        }
    }
}

/// 设备健康状态。
///
/// `Failed` 的设备不参与调度；`Offline` 由采集链路在设备无响应时设置，
/// 仍会按周期重试。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Online,
    Offline,
    Failed,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Failed => "failed",
        }
    }

    /// 是否可被调度器选中。
    pub fn is_schedulable(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl FromStr for DeviceStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" | "ok" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "failed" | "error" => Ok(Self::Failed),
            _ => Err(ParseError::new("device status", s)),
        }
    }
}

/// 设备记录。
#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: i64,
    pub name: String,
    pub protocol: ProtocolKind,
    /// 设备级轮询间隔（毫秒），为空时使用全局默认值
    pub polling_interval_ms: Option<u64>,
    pub logging_mode: LoggingMode,
    pub status: DeviceStatus,
    /// 半结构化设备配置（传输端点、从站号等）
    pub config: serde_json::Value,
}

impl Device {
    /// 设备实际使用的轮询间隔。
    pub fn polling_interval(&self, default: Duration) -> Duration {
        match self.polling_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => default,
        }
    }
}

/// 点位记录。
#[derive(Debug, Clone)]
pub struct Point {
    pub point_id: i64,
    pub device_id: i64,
    pub name: String,
    /// BACnet 对象类型（如 `analog-input`）
    pub object_type: Option<String>,
    /// BACnet 对象实例号
    pub object_instance: Option<u32>,
    /// Modbus 寄存器类型（如 `holding_register`）
    pub register_type: Option<String>,
    /// Modbus 寄存器地址
    pub register_address: Option<u16>,
    /// 半结构化点位配置（数据类型、字节序、缩放等）
    pub config: serde_json::Value,
    pub is_monitor: bool,
    pub is_history_enabled: bool,
    /// 已建历史表名（未建表时为空）
    pub table_name: Option<String>,
}
