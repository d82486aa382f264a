//! 存储数据模型定义

use serde::{Deserialize, Serialize};

/// 已建表的点位（导出视图与留存清理的数据源）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPoint {
    pub point_id: i64,
    pub device_name: String,
    pub point_name: String,
    pub table_name: String,
}

/// 导出视图中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub ts_ms: i64,
    pub value: f64,
    pub quality: String,
    pub device_name: String,
    pub point_name: String,
}

/// COV 缓存中的最后记录值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedValue {
    pub value: f64,
    pub ts_ms: i64,
}

/// 历史采样查询条件（毫秒时间范围，闭区间）
#[derive(Debug, Clone, Copy)]
pub struct SampleQuery {
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub limit: i64,
}

impl Default for SampleQuery {
    fn default() -> Self {
        Self {
            from_ms: None,
            to_ms: None,
            limit: 1000,
        }
    }
}
