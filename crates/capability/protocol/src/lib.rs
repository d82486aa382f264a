//! # 协议通信能力模块
//!
//! 为采集流水线提供按设备读取点位的能力，支持：
//! - **BACnet/IP**：ReadProperty 读取对象属性（UDP）
//! - **Modbus TCP**：读取线圈/离散输入/保持寄存器/输入寄存器
//!
//! ## 架构设计
//!
//! ```text
//! Device (protocol + config) + Points
//!       │
//!       ▼
//! DevicePointReader ── 过滤 is_monitor 点位，按协议选择适配器
//!       │
//!       ├── ProtocolAdapter::Bacnet ── BacnetTransport (BacnetIpClient)
//!       └── ProtocolAdapter::Modbus ── ModbusTransport (ModbusTcpTransport)
//!       │
//!       ▼
//! RequestQueue（每个协议接口一个：在途上限 + 速率窗口 + 单次超时）
//!       │
//!       ▼
//! DeviceReadResult → Pipeline
//! ```
//!
//! ## 配置格式
//!
//! ### BACnet/IP
//! ```json
//! // device.config
//! { "address": "192.168.1.50:47808", "device_instance": 1001 }
//!
//! // point: object_type = "analog-input", object_instance = 3
//! // point.config（可选）
//! { "property": "present-value" }
//! ```
//!
//! ### Modbus TCP
//! ```json
//! // device.config
//! { "host": "192.168.1.100", "port": 502, "unit_id": 1 }
//!
//! // point: register_type = "holding_register", register_address = 100
//! // point.config
//! { "data_type": "float32", "byte_order": "big_endian", "scale": 0.1 }
//! ```

mod bacnet;
mod bacnet_codec;
mod bacnet_ip;
mod error;
mod modbus_tcp;
mod queue;
mod reader;
mod types;

pub use bacnet::{BacnetAdapter, BacnetTransport};
pub use bacnet_codec::{Apdu, BacnetValue, decode_frame, encode_read_property};
pub use bacnet_ip::BacnetIpClient;
pub use error::ProtocolError;
pub use modbus_tcp::{ModbusAdapter, ModbusTcpTransport, ModbusTransport, parse_registers};
pub use queue::{QueueConfig, QueueStats, RequestQueue};
pub use reader::{DevicePointReader, PointReader, ProtocolAdapter};
pub use types::*;
