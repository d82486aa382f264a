//! 设备内存存储实现
//!
//! 仅用于测试和本地演示。

use crate::error::StorageError;
use crate::traits::DeviceStore;
use crate::in_memory::InMemoryPointStore;
use domain::{Device, DeviceStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// 设备内存存储
///
/// 关联点位存储后，`list_pollable_devices` 只返回有历史点位的设备。
pub struct InMemoryDeviceStore {
    devices: RwLock<BTreeMap<i64, Device>>,
    points: Option<Arc<InMemoryPointStore>>,
}

impl InMemoryDeviceStore {
    /// 创建新的设备存储
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            points: None,
        }
    }

    pub fn with_points(points: Arc<InMemoryPointStore>) -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            points: Some(points),
        }
    }

    pub fn insert(&self, device: Device) -> Result<(), StorageError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        devices.insert(device.device_id, device);
        Ok(())
    }

    /// 读取设备当前状态（用于测试）
    pub fn status(&self, device_id: i64) -> Option<DeviceStatus> {
        self.devices
            .read()
            .ok()
            .and_then(|map| map.get(&device_id).map(|device| device.status))
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn list_pollable_devices(&self) -> Result<Vec<Device>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let items = devices
            .values()
            .filter(|device| device.status.is_schedulable())
            .filter(|device| match &self.points {
                Some(points) => points
                    .snapshot(device.device_id)
                    .iter()
                    .any(|point| point.is_history_enabled),
                None => true,
            })
            .cloned()
            .collect();
        Ok(items)
    }

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(devices.get(&device_id).cloned())
    }

    async fn set_device_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
    ) -> Result<(), StorageError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(device) = devices.get_mut(&device_id) else {
            return Err(StorageError::new(format!("device {} not found", device_id)));
        };
        device.status = status;
        Ok(())
    }
}
