//! BACnet 适配器：对象 + 属性寻址的点位读取。

use crate::bacnet_codec::BacnetValue;
use crate::error::ProtocolError;
use crate::queue::RequestQueue;
use crate::reader::{PointOutcome, collect_readings};
use crate::types::{BacnetDeviceConfig, BacnetPointAddress, ObjectId};
use async_trait::async_trait;
use domain::{Device, DeviceReadResult, Point, QUALITY_GOOD, now_epoch_ms};
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// BACnet 传输层（ReadProperty 单次往返）
#[async_trait]
pub trait BacnetTransport: Send + Sync {
    async fn read_property(
        &self,
        target: SocketAddr,
        object: ObjectId,
        property: u32,
    ) -> Result<BacnetValue, ProtocolError>;
}

/// BACnet 适配器
pub struct BacnetAdapter {
    queue: Arc<RequestQueue>,
    transport: Arc<dyn BacnetTransport>,
}

impl BacnetAdapter {
    pub fn new(queue: Arc<RequestQueue>, transport: Arc<dyn BacnetTransport>) -> Self {
        Self { queue, transport }
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub async fn read_points(&self, device: &Device, points: &[Point]) -> DeviceReadResult {
        let config = match BacnetDeviceConfig::from_device(device) {
            Ok(config) => config,
            Err(e) => return config_failure(device, e),
        };
        let target = match config.target() {
            Ok(target) => target,
            Err(e) => return config_failure(device, e),
        };
        debug!(
            target: "ems.protocol",
            device_id = device.device_id,
            peer = %target,
            device_instance = ?config.device_instance,
            points = points.len(),
            "bacnet_read_points"
        );

        let reads = points.iter().map(|point| async move {
            let ts_ms = now_epoch_ms();
            PointOutcome {
                point_id: point.point_id,
                ts_ms,
                result: self.read_value(target, point).await,
            }
        });
        let outcomes = join_all(reads).await;
        collect_readings(device.device_id, outcomes)
    }

    async fn read_value(
        &self,
        target: SocketAddr,
        point: &Point,
    ) -> Result<(f64, String), ProtocolError> {
        let address = BacnetPointAddress::from_point(point)?;
        let value = self
            .queue
            .submit(
                self.transport
                    .read_property(target, address.object, address.property),
            )
            .await?;
        let numeric = value
            .as_f64()
            .ok_or_else(|| ProtocolError::DataParse(format!("non-numeric value {:?}", value)))?;
        Ok((numeric, QUALITY_GOOD.to_string()))
    }
}

fn config_failure(device: &Device, error: ProtocolError) -> DeviceReadResult {
    warn!(
        target: "ems.protocol",
        device_id = device.device_id,
        error = %error,
        "bacnet_device_config_invalid"
    );
    DeviceReadResult::unreachable(device.device_id, error.to_string())
}
