//! COV 最后记录值的进程内缓存
//!
//! 进程重启后为空，所有点位按冷启动处理。

use crate::error::StorageError;
use crate::models::CachedValue;
use crate::traits::LastValueCache;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryLastValueCache {
    values: RwLock<HashMap<i64, CachedValue>>,
}

impl InMemoryLastValueCache {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// 缓存条目数量（用于测试）
    pub fn len(&self) -> usize {
        self.values.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLastValueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LastValueCache for InMemoryLastValueCache {
    async fn get(&self, point_id: i64) -> Result<Option<CachedValue>, StorageError> {
        let values = self
            .values
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(values.get(&point_id).copied())
    }

    async fn set(&self, point_id: i64, value: f64, ts_ms: i64) -> Result<(), StorageError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        values.insert(point_id, CachedValue { value, ts_ms });
        Ok(())
    }
}
