//! 设备点位读取
//!
//! 按设备协议选择适配器，对监控点位并发发起排队读取，汇总为 [`DeviceReadResult`]。

use crate::bacnet::BacnetAdapter;
use crate::error::ProtocolError;
use crate::modbus_tcp::ModbusAdapter;
use async_trait::async_trait;
use domain::{Device, DeviceReadResult, Point, PointReading, ProtocolKind};
use tracing::{debug, warn};

/// 协议适配器（封闭集合，按设备协议一次性选定）
pub enum ProtocolAdapter {
    Bacnet(BacnetAdapter),
    Modbus(ModbusAdapter),
}

impl ProtocolAdapter {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Bacnet(_) => ProtocolKind::Bacnet,
            Self::Modbus(_) => ProtocolKind::Modbus,
        }
    }

    pub async fn read_points(&self, device: &Device, points: &[Point]) -> DeviceReadResult {
        match self {
            Self::Bacnet(adapter) => adapter.read_points(device, points).await,
            Self::Modbus(adapter) => adapter.read_points(device, points).await,
        }
    }
}

/// 点位读取接口（采集流水线只依赖该 trait）
#[async_trait]
pub trait PointReader: Send + Sync {
    async fn read_points(&self, device: &Device, points: &[Point]) -> DeviceReadResult;
}

/// 默认的设备点位读取器
#[derive(Default)]
pub struct DevicePointReader {
    adapters: Vec<ProtocolAdapter>,
}

impl DevicePointReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册协议适配器；同一协议重复注册时后者覆盖前者。
    pub fn with_adapter(mut self, adapter: ProtocolAdapter) -> Self {
        let kind = adapter.kind();
        self.adapters.retain(|existing| existing.kind() != kind);
        self.adapters.push(adapter);
        self
    }

    pub fn adapter_for(&self, kind: ProtocolKind) -> Option<&ProtocolAdapter> {
        self.adapters.iter().find(|adapter| adapter.kind() == kind)
    }
}

#[async_trait]
impl PointReader for DevicePointReader {
    async fn read_points(&self, device: &Device, points: &[Point]) -> DeviceReadResult {
        let monitored: Vec<Point> = points.iter().filter(|p| p.is_monitor).cloned().collect();
        if monitored.is_empty() {
            return DeviceReadResult::completed(device.device_id, Vec::new());
        }
        let Some(adapter) = self.adapter_for(device.protocol) else {
            warn!(
                target: "ems.protocol",
                device_id = device.device_id,
                protocol = %device.protocol,
                "protocol_adapter_missing"
            );
            return DeviceReadResult::unreachable(
                device.device_id,
                format!("no adapter configured for protocol {}", device.protocol),
            );
        };
        adapter.read_points(device, &monitored).await
    }
}

/// 单点读取结果（适配器内部汇总用）
pub(crate) struct PointOutcome {
    pub point_id: i64,
    pub ts_ms: i64,
    pub result: Result<(f64, String), ProtocolError>,
}

/// 汇总单点结果；所有点位都是传输层错误时视为设备无响应。
pub(crate) fn collect_readings(device_id: i64, outcomes: Vec<PointOutcome>) -> DeviceReadResult {
    let unreachable = !outcomes.is_empty()
        && outcomes
            .iter()
            .all(|o| matches!(&o.result, Err(e) if e.is_transport()));
    if unreachable {
        let error = outcomes
            .iter()
            .find_map(|o| o.result.as_ref().err())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no response".to_string());
        for _ in &outcomes {
            ems_telemetry::record_point_read(false);
        }
        return DeviceReadResult::unreachable(device_id, error);
    }

    let readings = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok((value, quality)) => {
                ems_telemetry::record_point_read(true);
                PointReading::ok(outcome.point_id, value, quality, outcome.ts_ms)
            }
            Err(e) => {
                ems_telemetry::record_point_read(false);
                debug!(
                    target: "ems.protocol",
                    device_id,
                    point_id = outcome.point_id,
                    error = %e,
                    "point_read_failed"
                );
                PointReading::error(outcome.point_id, e.to_string(), outcome.ts_ms)
            }
        })
        .collect();
    DeviceReadResult::completed(device_id, readings)
}
