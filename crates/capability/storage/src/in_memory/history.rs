//! 历史存储内存实现
//!
//! 每张"表"是一个按时间戳排序的 `BTreeMap`；导出视图保存定义时的点位集合，
//! 查询时按集合读取各表，语义与数据库视图一致。

use crate::error::StorageError;
use crate::models::{ExportRow, ProvisionedPoint, SampleQuery};
use crate::naming::{DEFAULT_TABLE_PREFIX, prefixed_table_name};
use crate::traits::{ExportViewStore, HistoryStore};
use crate::validation::ensure_identifier;
use domain::Sample;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 历史存储内存实现
pub struct InMemoryHistoryStore {
    prefix: String,
    view_name: String,
    tables: RwLock<HashMap<String, BTreeMap<i64, Sample>>>,
    view_sources: RwLock<Option<Vec<ProvisionedPoint>>>,
    view_rebuilds: AtomicU64,
    fail_writes: AtomicBool,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_TABLE_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            view_name: "history_export".to_string(),
            tables: RwLock::new(HashMap::new()),
            view_sources: RwLock::new(None),
            view_rebuilds: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// 表是否存在（用于测试）
    pub fn has_table(&self, table: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(table))
            .unwrap_or(false)
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().map(|tables| tables.len()).unwrap_or(0)
    }

    /// 表内行数（用于测试）
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|rows| rows.len()))
            .unwrap_or(0)
    }

    /// 视图是否已定义
    pub fn view_defined(&self) -> bool {
        self.view_sources
            .read()
            .map(|sources| sources.is_some())
            .unwrap_or(false)
    }

    /// 视图被替换的次数（用于测试）
    pub fn view_rebuild_count(&self) -> u64 {
        self.view_rebuilds.load(Ordering::Relaxed)
    }

    /// 让后续写入失败（用于测试写入失败路径）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_range(ts_ms: i64, query: &SampleQuery) -> bool {
    query.from_ms.is_none_or(|from| ts_ms >= from) && query.to_ms.is_none_or(|to| ts_ms <= to)
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    fn table_name(&self, device_name: &str, point_name: &str) -> String {
        prefixed_table_name(&self.prefix, device_name, point_name)
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StorageError> {
        ensure_identifier(table)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn append_sample(&self, table: &str, sample: &Sample) -> Result<bool, StorageError> {
        ensure_identifier(table)?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::new("write failed"));
        }
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(rows) = tables.get_mut(table) else {
            return Err(StorageError::new(format!(
                "relation \"{}\" does not exist",
                table
            )));
        };
        if rows.contains_key(&sample.ts_ms) {
            return Ok(false);
        }
        rows.insert(sample.ts_ms, sample.clone());
        Ok(true)
    }

    async fn query_samples(
        &self,
        table: &str,
        query: SampleQuery,
    ) -> Result<Vec<Sample>, StorageError> {
        ensure_identifier(table)?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(rows) = tables.get(table) else {
            return Err(StorageError::new(format!(
                "relation \"{}\" does not exist",
                table
            )));
        };
        Ok(rows
            .values()
            .filter(|sample| in_range(sample.ts_ms, &query))
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn prune_before(&self, table: &str, cutoff_ms: i64) -> Result<u64, StorageError> {
        ensure_identifier(table)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(rows) = tables.get_mut(table) else {
            return Err(StorageError::new(format!(
                "relation \"{}\" does not exist",
                table
            )));
        };
        let kept = rows.split_off(&cutoff_ms);
        let removed = rows.len() as u64;
        *rows = kept;
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl ExportViewStore for InMemoryHistoryStore {
    fn view_name(&self) -> &str {
        &self.view_name
    }

    async fn replace_export_view(&self, sources: &[ProvisionedPoint]) -> Result<(), StorageError> {
        // 与数据库一致：引用不存在的表时视图定义失败
        {
            let tables = self
                .tables
                .read()
                .map_err(|_| StorageError::new("lock failed"))?;
            for source in sources {
                ensure_identifier(&source.table_name)?;
                if !tables.contains_key(&source.table_name) {
                    return Err(StorageError::new(format!(
                        "relation \"{}\" does not exist",
                        source.table_name
                    )));
                }
            }
        }
        let mut seen = HashSet::new();
        let unique: Vec<ProvisionedPoint> = sources
            .iter()
            .filter(|source| seen.insert(source.table_name.clone()))
            .cloned()
            .collect();
        *self
            .view_sources
            .write()
            .map_err(|_| StorageError::new("lock failed"))? = Some(unique);
        self.view_rebuilds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query_export(&self, query: SampleQuery) -> Result<Vec<ExportRow>, StorageError> {
        let sources = self
            .view_sources
            .read()
            .map_err(|_| StorageError::new("lock failed"))?
            .clone()
            .ok_or_else(|| {
                StorageError::new(format!("relation \"{}\" does not exist", self.view_name))
            })?;
        let tables = self
            .tables
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut rows = Vec::new();
        for source in &sources {
            let Some(samples) = tables.get(&source.table_name) else {
                continue;
            };
            rows.extend(
                samples
                    .values()
                    .filter(|sample| in_range(sample.ts_ms, &query))
                    .map(|sample| ExportRow {
                        ts_ms: sample.ts_ms,
                        value: sample.value,
                        quality: sample.quality.clone(),
                        device_name: source.device_name.clone(),
                        point_name: source.point_name.clone(),
                    }),
            );
        }
        rows.sort_by(|a, b| {
            a.ts_ms
                .cmp(&b.ts_ms)
                .then_with(|| a.device_name.cmp(&b.device_name))
                .then_with(|| a.point_name.cmp(&b.point_name))
        });
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }
}
