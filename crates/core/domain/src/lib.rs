//! 采集链路共享的领域模型。
//!
//! - [`asset`]：设备与点位（元数据由外部设备管理模块维护，采集链路只读）
//! - [`data`]：读取结果与历史采样值

pub mod asset;
pub mod data;

pub use asset::{Device, DeviceStatus, LoggingMode, ParseError, Point, ProtocolKind};
pub use data::{DeviceReadResult, PointReading, ReadStatus, Sample, QUALITY_GOOD, now_epoch_ms};
