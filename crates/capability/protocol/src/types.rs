//! 协议相关类型定义
//!
//! 设备 `config` 与点位 `config` 是半结构化 JSON，这里定义各协议的解析结构。

use crate::error::ProtocolError;
use domain::{Device, Point};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::str::FromStr;

/// BACnet/IP 默认端口（0xBAC0）
pub const BACNET_DEFAULT_PORT: u16 = 47808;

/// BACnet `present-value` 属性标识
pub const PROP_PRESENT_VALUE: u32 = 85;

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusDataType {
    /// 16位有符号整数
    #[default]
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl ModbusDataType {
    /// 该类型需要的寄存器数量
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }
}

/// Modbus 寄存器类型（对应读功能码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusRegisterType {
    /// 线圈 (0x01)
    Coil,
    /// 离散输入 (0x02)
    DiscreteInput,
    /// 保持寄存器 (0x03)
    HoldingRegister,
    /// 输入寄存器 (0x04)
    InputRegister,
}

impl ModbusRegisterType {
    pub fn function_code(&self) -> u8 {
        match self {
            Self::Coil => 1,
            Self::DiscreteInput => 2,
            Self::HoldingRegister => 3,
            Self::InputRegister => 4,
        }
    }

    /// 是否为位类型（线圈/离散输入）
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

impl FromStr for ModbusRegisterType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "coil" | "coils" | "co" | "1" => Ok(Self::Coil),
            "discrete_input" | "discrete_inputs" | "di" | "2" => Ok(Self::DiscreteInput),
            "holding_register" | "holding_registers" | "holding" | "hr" | "3" => {
                Ok(Self::HoldingRegister)
            }
            "input_register" | "input_registers" | "input" | "ir" | "4" => Ok(Self::InputRegister),
            _ => Err(ProtocolError::ConfigParse(format!(
                "unsupported register type: {}",
                s
            ))),
        }
    }
}

/// 多寄存器值的字序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// 高字在前
    #[default]
    BigEndian,
    /// 低字在前
    LittleEndian,
}

/// 设备传输配置（Modbus）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusDeviceConfig {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 从站 ID (1-247)
    #[serde(default = "default_unit_id", alias = "slave_id")]
    pub unit_id: u8,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

impl ModbusDeviceConfig {
    pub fn from_device(device: &Device) -> Result<Self, ProtocolError> {
        parse_config(&device.config, "modbus device config")
    }

    pub fn endpoint(&self) -> Result<SocketAddr, ProtocolError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ProtocolError::ConfigParse(format!("invalid address: {}", e)))
    }
}

/// 点位协议详情（Modbus），来自 `point.config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModbusPointConfig {
    /// 数据类型
    #[serde(default)]
    pub data_type: ModbusDataType,
    /// 寄存器数量，缺省时由数据类型推导
    #[serde(default)]
    pub register_count: Option<u16>,
    /// 字序（big_endian / little_endian）
    #[serde(default)]
    pub byte_order: WordOrder,
    /// 缩放系数
    #[serde(default)]
    pub scale: Option<f64>,
    /// 偏移量
    #[serde(default)]
    pub offset: Option<f64>,
}

/// 单个 Modbus 点位的完整寻址信息
#[derive(Debug, Clone)]
pub struct ModbusPointAddress {
    pub register_type: ModbusRegisterType,
    pub address: u16,
    pub count: u16,
    pub data_type: ModbusDataType,
    pub word_order: WordOrder,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
}

impl ModbusPointAddress {
    pub fn from_point(point: &Point) -> Result<Self, ProtocolError> {
        let register_type = point
            .register_type
            .as_deref()
            .unwrap_or("holding_register")
            .parse::<ModbusRegisterType>()?;
        let address = point.register_address.ok_or_else(|| {
            ProtocolError::ConfigParse(format!("point {} has no register address", point.point_id))
        })?;
        let config: ModbusPointConfig = parse_config(&point.config, "modbus point config")?;
        let count = if register_type.is_bit() {
            1
        } else {
            config
                .register_count
                .unwrap_or_else(|| config.data_type.register_count())
                .max(config.data_type.register_count())
        };
        Ok(Self {
            register_type,
            address,
            count,
            data_type: config.data_type,
            word_order: config.byte_order,
            scale: config.scale,
            offset: config.offset,
        })
    }

    /// 应用缩放和偏移
    pub fn apply_scaling(&self, raw: f64) -> f64 {
        match (self.scale, self.offset) {
            (Some(scale), Some(offset)) => raw * scale + offset,
            (Some(scale), None) => raw * scale,
            (None, Some(offset)) => raw + offset,
            (None, None) => raw,
        }
    }
}

/// 设备传输配置（BACnet/IP）
///
/// 支持 `{"address": "10.0.0.5:47808"}` 或 `{"host": "10.0.0.5", "port": 47808}`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacnetDeviceConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "ip")]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// 设备对象实例号（仅用于日志）
    #[serde(default)]
    pub device_instance: Option<u32>,
}

impl BacnetDeviceConfig {
    pub fn from_device(device: &Device) -> Result<Self, ProtocolError> {
        parse_config(&device.config, "bacnet device config")
    }

    pub fn target(&self) -> Result<SocketAddr, ProtocolError> {
        let raw = match (&self.address, &self.host) {
            (Some(address), _) if address.contains(':') => address.clone(),
            (Some(address), _) => {
                format!("{}:{}", address, self.port.unwrap_or(BACNET_DEFAULT_PORT))
            }
            (None, Some(host)) => format!("{}:{}", host, self.port.unwrap_or(BACNET_DEFAULT_PORT)),
            (None, None) => {
                return Err(ProtocolError::ConfigParse(
                    "bacnet device config has no address".to_string(),
                ));
            }
        };
        raw.parse()
            .map_err(|e| ProtocolError::ConfigParse(format!("invalid address {}: {}", raw, e)))
    }
}

/// BACnet 对象标识（类型 + 实例号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub object_type: u16,
    pub instance: u32,
}

impl ObjectId {
    /// 实例号上限（22 位）
    pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

    pub fn new(object_type: u16, instance: u32) -> Result<Self, ProtocolError> {
        if object_type > 0x3FF || instance > Self::MAX_INSTANCE {
            return Err(ProtocolError::ConfigParse(format!(
                "object identifier out of range: {}:{}",
                object_type, instance
            )));
        }
        Ok(Self {
            object_type,
            instance,
        })
    }

    /// 编码为 32 位对象标识
    pub fn encode(&self) -> u32 {
        ((self.object_type as u32 & 0x3FF) << 22) | (self.instance & Self::MAX_INSTANCE)
    }
}

/// 解析 BACnet 对象类型：名称（`analog-input` / `analogInput`）、缩写（`AI`）或数字。
pub fn parse_object_type(raw: &str) -> Result<u16, ProtocolError> {
    if let Ok(code) = raw.trim().parse::<u16>() {
        return Ok(code);
    }
    let normalized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let code = match normalized.as_str() {
        "analoginput" | "ai" => 0,
        "analogoutput" | "ao" => 1,
        "analogvalue" | "av" => 2,
        "binaryinput" | "bi" => 3,
        "binaryoutput" | "bo" => 4,
        "binaryvalue" | "bv" => 5,
        "device" | "dev" => 8,
        "multistateinput" | "msi" => 13,
        "multistateoutput" | "mso" => 14,
        "multistatevalue" | "msv" => 19,
        "accumulator" | "acc" => 23,
        "pulseconverter" | "pc" => 24,
        "integervalue" | "iv" => 45,
        "largeanalogvalue" | "lav" => 46,
        "positiveintegervalue" | "piv" => 48,
        _ => {
            return Err(ProtocolError::ConfigParse(format!(
                "unsupported object type: {}",
                raw
            )));
        }
    };
    Ok(code)
}

/// 解析 BACnet 属性标识：名称或数字，缺省为 `present-value`。
pub fn parse_property(raw: Option<&serde_json::Value>) -> Result<u32, ProtocolError> {
    let Some(raw) = raw else {
        return Ok(PROP_PRESENT_VALUE);
    };
    if let Some(code) = raw.as_u64() {
        return u32::try_from(code)
            .map_err(|_| ProtocolError::ConfigParse(format!("property out of range: {}", code)));
    }
    let text = raw
        .as_str()
        .ok_or_else(|| ProtocolError::ConfigParse(format!("invalid property: {}", raw)))?;
    if let Ok(code) = text.trim().parse::<u32>() {
        return Ok(code);
    }
    let normalized: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "presentvalue" | "pv" => Ok(PROP_PRESENT_VALUE),
        "highlimit" => Ok(45),
        "lowlimit" => Ok(59),
        "relinquishdefault" => Ok(104),
        "covincrement" => Ok(22),
        _ => Err(ProtocolError::ConfigParse(format!(
            "unsupported property: {}",
            text
        ))),
    }
}

/// 单个 BACnet 点位的寻址信息
#[derive(Debug, Clone, Copy)]
pub struct BacnetPointAddress {
    pub object: ObjectId,
    pub property: u32,
}

impl BacnetPointAddress {
    pub fn from_point(point: &Point) -> Result<Self, ProtocolError> {
        let object_type = point.object_type.as_deref().ok_or_else(|| {
            ProtocolError::ConfigParse(format!("point {} has no object type", point.point_id))
        })?;
        let instance = point.object_instance.ok_or_else(|| {
            ProtocolError::ConfigParse(format!("point {} has no object instance", point.point_id))
        })?;
        let object = ObjectId::new(parse_object_type(object_type)?, instance)?;
        let property = parse_property(point.config.get("property"))?;
        Ok(Self { object, property })
    }
}

/// 将 `config` JSON 解析为协议结构（`null` 视为空对象）。
fn parse_config<T: DeserializeOwned>(
    value: &serde_json::Value,
    what: &str,
) -> Result<T, ProtocolError> {
    let value = if value.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|e| ProtocolError::ConfigParse(format!("{}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(config: serde_json::Value) -> Point {
        Point {
            point_id: 1,
            device_id: 1,
            name: "p".to_string(),
            object_type: Some("analog-input".to_string()),
            object_instance: Some(3),
            register_type: Some("input_register".to_string()),
            register_address: Some(100),
            config,
            is_monitor: true,
            is_history_enabled: true,
            table_name: None,
        }
    }

    #[test]
    fn test_parse_object_type_variants() {
        assert_eq!(parse_object_type("analog-input").unwrap(), 0);
        assert_eq!(parse_object_type("analogValue").unwrap(), 2);
        assert_eq!(parse_object_type("BI").unwrap(), 3);
        assert_eq!(parse_object_type("multi-state-value").unwrap(), 19);
        assert_eq!(parse_object_type("130").unwrap(), 130);
        assert!(parse_object_type("thermostat").is_err());
    }

    #[test]
    fn test_object_id_encode() {
        let id = ObjectId::new(2, 5).unwrap();
        assert_eq!(id.encode(), 0x0080_0005);
        assert!(ObjectId::new(0, ObjectId::MAX_INSTANCE + 1).is_err());
    }

    #[test]
    fn test_bacnet_point_defaults_to_present_value() {
        let address = BacnetPointAddress::from_point(&point(json!({}))).unwrap();
        assert_eq!(address.property, PROP_PRESENT_VALUE);
        assert_eq!(address.object.instance, 3);

        let address =
            BacnetPointAddress::from_point(&point(json!({"property": "high-limit"}))).unwrap();
        assert_eq!(address.property, 45);
    }

    #[test]
    fn test_bacnet_target() {
        let config = BacnetDeviceConfig {
            host: Some("10.0.0.5".to_string()),
            ..Default::default()
        };
        assert_eq!(config.target().unwrap().port(), BACNET_DEFAULT_PORT);

        let config = BacnetDeviceConfig {
            address: Some("10.0.0.6:47809".to_string()),
            ..Default::default()
        };
        assert_eq!(config.target().unwrap().port(), 47809);

        assert!(BacnetDeviceConfig::default().target().is_err());
    }

    #[test]
    fn test_parse_modbus_device_config() {
        let config: ModbusDeviceConfig =
            serde_json::from_value(json!({"host": "192.168.1.100", "slave_id": 7})).unwrap();
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 7);
        assert_eq!(config.endpoint().unwrap().to_string(), "192.168.1.100:502");
    }

    #[test]
    fn test_modbus_point_address() {
        let address = ModbusPointAddress::from_point(&point(json!({
            "data_type": "float32",
            "byte_order": "little_endian",
            "scale": 0.5
        })))
        .unwrap();
        assert_eq!(address.register_type, ModbusRegisterType::InputRegister);
        assert_eq!(address.address, 100);
        assert_eq!(address.count, 2);
        assert_eq!(address.word_order, WordOrder::LittleEndian);
        assert_eq!(address.apply_scaling(250.0), 125.0);
    }

    #[test]
    fn test_register_type_aliases() {
        assert_eq!("HR".parse::<ModbusRegisterType>().unwrap(), ModbusRegisterType::HoldingRegister);
        assert_eq!("discrete-input".parse::<ModbusRegisterType>().unwrap(), ModbusRegisterType::DiscreteInput);
        assert!("bogus".parse::<ModbusRegisterType>().is_err());
    }
}
