//! 存储接口 Trait 定义
//!
//! - DeviceStore / PointStore：设备与点位元数据（由外部设备管理模块维护）
//! - HistoryStore：按点位分表的历史存储
//! - ExportViewStore：跨所有点位表的导出视图
//! - LastValueCache：COV 变化检测使用的最后记录值缓存
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use crate::models::{CachedValue, ExportRow, ProvisionedPoint, SampleQuery};
use async_trait::async_trait;
use domain::{Device, DeviceStatus, Point, Sample};

/// 设备存储接口
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 列出可调度设备：至少一个点位开启历史记录，且状态不是 `Failed`
    async fn list_pollable_devices(&self) -> Result<Vec<Device>, StorageError>;

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>, StorageError>;

    async fn set_device_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
    ) -> Result<(), StorageError>;
}

/// 点位存储接口
#[async_trait]
pub trait PointStore: Send + Sync {
    /// 列出设备下的全部点位（按 point_id 排序）
    async fn list_points(&self, device_id: i64) -> Result<Vec<Point>, StorageError>;

    /// 写入（或清空）点位的历史表引用
    async fn set_point_table(
        &self,
        point_id: i64,
        table_name: Option<&str>,
    ) -> Result<(), StorageError>;

    /// 列出所有已登记表引用的点位（连同设备名）
    async fn list_provisioned_points(&self) -> Result<Vec<ProvisionedPoint>, StorageError>;
}

/// 按点位分表的历史存储接口
///
/// 调用方只依赖表名与采样，底层可替换为单表分区等其他布局。
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 计算点位的历史表名（纯函数）
    fn table_name(&self, device_name: &str, point_name: &str) -> String;

    /// 建表（已存在时不报错）
    async fn ensure_table(&self, table: &str) -> Result<(), StorageError>;

    /// 追加采样；时间戳已存在时忽略。返回是否实际插入。
    async fn append_sample(&self, table: &str, sample: &Sample) -> Result<bool, StorageError>;

    /// 按时间升序查询采样
    async fn query_samples(
        &self,
        table: &str,
        query: SampleQuery,
    ) -> Result<Vec<Sample>, StorageError>;

    /// 删除早于 `cutoff_ms` 的采样，返回删除行数
    async fn prune_before(&self, table: &str, cutoff_ms: i64) -> Result<u64, StorageError>;
}

/// 导出视图存储接口
#[async_trait]
pub trait ExportViewStore: Send + Sync {
    fn view_name(&self) -> &str;

    /// 以给定点位集合整体替换视图定义
    async fn replace_export_view(&self, sources: &[ProvisionedPoint]) -> Result<(), StorageError>;

    /// 按时间升序读取视图
    async fn query_export(&self, query: SampleQuery) -> Result<Vec<ExportRow>, StorageError>;
}

/// COV 最后记录值缓存接口
#[async_trait]
pub trait LastValueCache: Send + Sync {
    async fn get(&self, point_id: i64) -> Result<Option<CachedValue>, StorageError>;

    async fn set(&self, point_id: i64, value: f64, ts_ms: i64) -> Result<(), StorageError>;
}
