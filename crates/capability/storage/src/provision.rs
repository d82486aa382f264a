//! 历史表建表与引用登记
//!
//! 表名以重新计算的结果为准：已存储的引用与之不一致时视为需要修复，
//! 确保新表存在并改写引用，旧表保持不动。
//!
//! 所有建表、登记与视图重建都经同一把异步锁串行执行。

use crate::error::StorageError;
use crate::traits::{DeviceStore, ExportViewStore, HistoryStore, PointStore};
use crate::view_builder::ExportViewBuilder;
use domain::Point;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 单个点位的建表结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableResolution {
    pub table_name: String,
    /// 本次是否写入/改写了点位引用
    pub changed: bool,
}

/// 设备（或批量设备）建表汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// 新登记引用的点位数
    pub provisioned: usize,
    /// 引用被修复的点位数
    pub repaired: usize,
    /// 引用已正确的点位数
    pub unchanged: usize,
    pub failed: usize,
    pub view_rebuilt: bool,
}

impl ProvisionReport {
    pub fn changed(&self) -> bool {
        self.provisioned + self.repaired > 0
    }
}

pub struct TableProvisioner {
    devices: Arc<dyn DeviceStore>,
    points: Arc<dyn PointStore>,
    history: Arc<dyn HistoryStore>,
    view_builder: ExportViewBuilder,
    lock: Mutex<()>,
}

impl TableProvisioner {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        points: Arc<dyn PointStore>,
        history: Arc<dyn HistoryStore>,
        view: Arc<dyn ExportViewStore>,
    ) -> Self {
        let view_builder = ExportViewBuilder::new(points.clone(), history.clone(), view);
        Self {
            devices,
            points,
            history,
            view_builder,
            lock: Mutex::new(()),
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// 为设备下所有开启历史记录的点位建表并登记引用；集合变化时重建视图。
    pub async fn provision_device(&self, device_id: i64) -> Result<ProvisionReport, StorageError> {
        let _guard = self.lock.lock().await;
        let mut report = self.provision_device_locked(device_id).await?;
        if report.changed() {
            report.view_rebuilt = self.view_builder.rebuild().await.is_ok();
        }
        Ok(report)
    }

    /// 启动时对账：逐个设备建表，最后无条件重建一次视图（保证视图存在）。
    ///
    /// 单个设备失败只记录日志。
    pub async fn reconcile(&self, device_ids: &[i64]) -> Result<ProvisionReport, StorageError> {
        let _guard = self.lock.lock().await;
        let mut total = ProvisionReport::default();
        for device_id in device_ids {
            match self.provision_device_locked(*device_id).await {
                Ok(report) => {
                    total.provisioned += report.provisioned;
                    total.repaired += report.repaired;
                    total.unchanged += report.unchanged;
                    total.failed += report.failed;
                }
                Err(err) => {
                    total.failed += 1;
                    warn!(
                        target: "ems.storage",
                        device_id,
                        error = %err,
                        "device_provision_failed"
                    );
                }
            }
        }
        self.view_builder.rebuild().await?;
        total.view_rebuilt = true;
        Ok(total)
    }

    /// 确保单个点位的表存在并登记引用（采集流水线的懒建表入口）。
    ///
    /// 引用已等于重新计算的表名时直接返回，不执行 DDL；不触发视图重建，
    /// 由调用方在一轮结束后按需调用 [`Self::rebuild_export_view`]。
    pub async fn ensure_point_table(
        &self,
        device_name: &str,
        point: &Point,
    ) -> Result<TableResolution, StorageError> {
        let expected = self.history.table_name(device_name, &point.name);
        if point.table_name.as_deref() == Some(expected.as_str()) {
            return Ok(TableResolution {
                table_name: expected,
                changed: false,
            });
        }
        let _guard = self.lock.lock().await;
        self.resolve_locked(device_name, point).await
    }

    /// 重建导出视图
    pub async fn rebuild_export_view(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        self.view_builder.rebuild().await
    }

    async fn provision_device_locked(&self, device_id: i64) -> Result<ProvisionReport, StorageError> {
        let device = self
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| StorageError::new(format!("device {} not found", device_id)))?;
        let points = self.points.list_points(device_id).await?;

        let mut report = ProvisionReport::default();
        for point in points.iter().filter(|point| point.is_history_enabled) {
            match self.resolve_locked(&device.name, point).await {
                Ok(resolution) if !resolution.changed => report.unchanged += 1,
                Ok(_) if point.table_name.is_some() => report.repaired += 1,
                Ok(_) => report.provisioned += 1,
                Err(_) => report.failed += 1,
            }
        }
        info!(
            target: "ems.storage",
            device_id,
            provisioned = report.provisioned,
            repaired = report.repaired,
            unchanged = report.unchanged,
            failed = report.failed,
            "device_provisioned"
        );
        Ok(report)
    }

    async fn resolve_locked(
        &self,
        device_name: &str,
        point: &Point,
    ) -> Result<TableResolution, StorageError> {
        let expected = self.history.table_name(device_name, &point.name);
        let result = self.apply_reference(point, &expected).await;
        if let Err(err) = &result {
            ems_telemetry::record_provision_failure();
            warn!(
                target: "ems.storage",
                point_id = point.point_id,
                table = %expected,
                error = %err,
                "table_provision_failed"
            );
        }
        result
    }

    /// 两个点位推导出同一表名时拒绝后来者，避免历史数据混写。
    async fn check_unclaimed(&self, point: &Point, expected: &str) -> Result<(), StorageError> {
        let owner = self
            .points
            .list_provisioned_points()
            .await?
            .into_iter()
            .find(|p| p.table_name == expected && p.point_id != point.point_id);
        match owner {
            Some(owner) => Err(StorageError::new(format!(
                "table {} already referenced by point {}",
                expected, owner.point_id
            ))),
            None => Ok(()),
        }
    }

    async fn apply_reference(
        &self,
        point: &Point,
        expected: &str,
    ) -> Result<TableResolution, StorageError> {
        let changed = point.table_name.as_deref() != Some(expected);
        if changed {
            self.check_unclaimed(point, expected).await?;
        }
        self.history.ensure_table(expected).await?;
        if changed {
            self.points
                .set_point_table(point.point_id, Some(expected))
                .await?;
            match &point.table_name {
                Some(stored) => {
                    ems_telemetry::record_table_ref_repaired();
                    warn!(
                        target: "ems.storage",
                        point_id = point.point_id,
                        stored = %stored,
                        expected = %expected,
                        "table_ref_repaired"
                    );
                }
                None => {
                    ems_telemetry::record_table_provisioned();
                    info!(
                        target: "ems.storage",
                        point_id = point.point_id,
                        table = %expected,
                        "table_provisioned"
                    );
                }
            }
        }
        Ok(TableResolution {
            table_name: expected.to_string(),
            changed,
        })
    }
}
