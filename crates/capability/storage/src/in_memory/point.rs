//! 点位内存存储实现
//!
//! 仅用于测试和本地演示。`list_provisioned_points` 需要设备名，
//! 因此插入点位时一并记录所属设备名。

use crate::error::StorageError;
use crate::models::ProvisionedPoint;
use crate::traits::PointStore;
use domain::Point;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// 点位内存存储
pub struct InMemoryPointStore {
    points: RwLock<BTreeMap<i64, Point>>,
    device_names: RwLock<HashMap<i64, String>>,
}

impl InMemoryPointStore {
    /// 创建新的点位存储
    pub fn new() -> Self {
        Self {
            points: RwLock::new(BTreeMap::new()),
            device_names: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, device_name: &str, point: Point) -> Result<(), StorageError> {
        self.device_names
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .insert(point.device_id, device_name.to_string());
        self.points
            .write()
            .map_err(|_| StorageError::new("lock failed"))?
            .insert(point.point_id, point);
        Ok(())
    }

    /// 读取单个点位（用于测试）
    pub fn get(&self, point_id: i64) -> Option<Point> {
        self.points
            .read()
            .ok()
            .and_then(|map| map.get(&point_id).cloned())
    }

    /// 设备下的点位快照
    pub fn snapshot(&self, device_id: i64) -> Vec<Point> {
        self.points
            .read()
            .map(|map| {
                map.values()
                    .filter(|point| point.device_id == device_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryPointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PointStore for InMemoryPointStore {
    async fn list_points(&self, device_id: i64) -> Result<Vec<Point>, StorageError> {
        let points = self
            .points
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(points
            .values()
            .filter(|point| point.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn set_point_table(
        &self,
        point_id: i64,
        table_name: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut points = self
            .points
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(point) = points.get_mut(&point_id) else {
            return Err(StorageError::new(format!("point {} not found", point_id)));
        };
        point.table_name = table_name.map(str::to_string);
        Ok(())
    }

    async fn list_provisioned_points(&self) -> Result<Vec<ProvisionedPoint>, StorageError> {
        let points = self
            .points
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let device_names = self
            .device_names
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(points
            .values()
            .filter_map(|point| {
                let table_name = point.table_name.clone()?;
                Some(ProvisionedPoint {
                    point_id: point.point_id,
                    device_name: device_names.get(&point.device_id).cloned().unwrap_or_default(),
                    point_name: point.name.clone(),
                    table_name,
                })
            })
            .collect())
    }
}
