//! 单设备采集流水线
//!
//! 一次轮询：列点位 → 读取 → COV 判定 → 按需建表 → 写入 → 提交缓存。
//! 流水线只在阶段之间检查取消令牌，不中断进行中的 I/O。

use crate::cov::ChangeDetector;
use crate::error::PipelineError;
use async_trait::async_trait;
use domain::{Device, DeviceStatus, Point, PointReading, Sample};
use ems_protocol::PointReader;
use ems_storage::{DeviceStore, PointStore, TableProvisioner};
use ems_telemetry::{
    new_poll_id, record_device_unreachable, record_poll_completed, record_sample_dropped_unprovisioned,
    record_sample_duplicate, record_sample_logged, record_sample_suppressed, record_write_failure,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// 单轮统计。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub read_ok: usize,
    pub read_failed: usize,
    /// 非有限值（NaN/∞）被拒绝的数量
    pub invalid: usize,
    pub logged: usize,
    pub suppressed: usize,
    pub duplicate: usize,
    /// 点位未能建表而丢弃的采样数
    pub dropped: usize,
    pub write_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(PollSummary),
    /// 设备整体无响应，本轮未写入任何数据
    Unreachable(String),
    Cancelled,
    Failed(String),
}

/// 调度器与流水线之间的接缝。
#[async_trait]
pub trait DevicePoller: Send + Sync {
    async fn poll_device(&self, device: Device, cancel: CancellationToken) -> PollOutcome;
}

/// 历史记录流水线。
pub struct HistoryPipeline {
    devices: Arc<dyn DeviceStore>,
    points: Arc<dyn PointStore>,
    reader: Arc<dyn PointReader>,
    detector: ChangeDetector,
    provisioner: Arc<TableProvisioner>,
    update_device_status: bool,
}

impl HistoryPipeline {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        points: Arc<dyn PointStore>,
        reader: Arc<dyn PointReader>,
        detector: ChangeDetector,
        provisioner: Arc<TableProvisioner>,
    ) -> Self {
        Self {
            devices,
            points,
            reader,
            detector,
            provisioner,
            update_device_status: true,
        }
    }

    /// 是否维护设备 Offline/Online 状态
    pub fn with_status_updates(mut self, enabled: bool) -> Self {
        self.update_device_status = enabled;
        self
    }

    /// 执行一轮采集。
    pub async fn run(
        &self,
        device: &Device,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PipelineError> {
        let points = self.points.list_points(device.device_id).await?;
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let result = self.reader.read_points(device, &points).await;
        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "device did not respond".to_string());
            record_device_unreachable();
            warn!(
                target: "ems.pipeline",
                device_id = device.device_id,
                error = %reason,
                "device_unreachable"
            );
            self.transition_status(device, DeviceStatus::Offline).await;
            return Ok(PollOutcome::Unreachable(reason));
        }
        self.transition_status(device, DeviceStatus::Online).await;

        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let by_id: HashMap<i64, &Point> = points.iter().map(|p| (p.point_id, p)).collect();
        let mut summary = PollSummary::default();
        let mut provisioned_changed = false;
        for reading in &result.readings {
            let Some(point) = by_id.get(&reading.point_id) else {
                continue;
            };
            if !reading.is_ok() {
                summary.read_failed += 1;
                continue;
            }
            summary.read_ok += 1;
            if !point.is_history_enabled {
                continue;
            }
            if self
                .handle_reading(device, point, reading, &mut summary)
                .await
            {
                provisioned_changed = true;
            }
        }

        if provisioned_changed {
            if let Err(err) = self.provisioner.rebuild_export_view().await {
                warn!(
                    target: "ems.pipeline",
                    device_id = device.device_id,
                    error = %err,
                    "export_view_rebuild_failed"
                );
            }
        }

        info!(
            target: "ems.pipeline",
            device_id = device.device_id,
            read_ok = summary.read_ok,
            read_failed = summary.read_failed,
            logged = summary.logged,
            suppressed = summary.suppressed,
            duplicate = summary.duplicate,
            dropped = summary.dropped,
            write_failed = summary.write_failed,
            "poll_completed"
        );
        Ok(PollOutcome::Completed(summary))
    }

    /// 处理单个读数；返回本次是否新登记了表引用。
    async fn handle_reading(
        &self,
        device: &Device,
        point: &Point,
        reading: &PointReading,
        summary: &mut PollSummary,
    ) -> bool {
        let value = match reading.value {
            Some(value) if value.is_finite() => value,
            other => {
                summary.invalid += 1;
                warn!(
                    target: "ems.pipeline",
                    point_id = point.point_id,
                    value = ?other,
                    "invalid_value"
                );
                return false;
            }
        };

        let decision = self
            .detector
            .evaluate(point.point_id, device.logging_mode, value, reading.ts_ms)
            .await;
        if !decision.should_log() {
            summary.suppressed += 1;
            record_sample_suppressed();
            return false;
        }

        let resolution = match self.provisioner.ensure_point_table(&device.name, point).await {
            Ok(resolution) => resolution,
            Err(err) => {
                summary.dropped += 1;
                record_sample_dropped_unprovisioned();
                warn!(
                    target: "ems.pipeline",
                    point_id = point.point_id,
                    error = %err,
                    "sample_dropped_unprovisioned"
                );
                return false;
            }
        };

        let sample = Sample {
            ts_ms: reading.ts_ms,
            value,
            quality: reading.quality.clone(),
        };
        let committed = match self
            .provisioner
            .history()
            .append_sample(&resolution.table_name, &sample)
            .await
        {
            Ok(true) => {
                summary.logged += 1;
                record_sample_logged();
                debug!(
                    target: "ems.pipeline",
                    point_id = point.point_id,
                    table = %resolution.table_name,
                    value,
                    reason = decision.as_str(),
                    "sample_logged"
                );
                true
            }
            Ok(false) => {
                summary.duplicate += 1;
                record_sample_duplicate();
                true
            }
            Err(err) => {
                summary.write_failed += 1;
                record_write_failure();
                warn!(
                    target: "ems.pipeline",
                    point_id = point.point_id,
                    table = %resolution.table_name,
                    error = %err,
                    "sample_write_failed"
                );
                false
            }
        };

        if committed {
            if let Err(err) = self
                .detector
                .record(point.point_id, value, reading.ts_ms)
                .await
            {
                warn!(
                    target: "ems.pipeline",
                    point_id = point.point_id,
                    error = %err,
                    "cov_cache_write_failed"
                );
            }
        }
        resolution.changed
    }

    async fn transition_status(&self, device: &Device, next: DeviceStatus) {
        if !self.update_device_status || device.status == next {
            return;
        }
        match self.devices.set_device_status(device.device_id, next).await {
            Ok(()) => info!(
                target: "ems.pipeline",
                device_id = device.device_id,
                from = device.status.as_str(),
                to = next.as_str(),
                "device_status_changed"
            ),
            Err(err) => warn!(
                target: "ems.pipeline",
                device_id = device.device_id,
                error = %err,
                "device_status_update_failed"
            ),
        }
    }
}

#[async_trait]
impl DevicePoller for HistoryPipeline {
    async fn poll_device(&self, device: Device, cancel: CancellationToken) -> PollOutcome {
        let span = tracing::info_span!(
            "poll",
            poll_id = %new_poll_id(),
            device_id = device.device_id,
            device = %device.name
        );
        let outcome = match self.run(&device, &cancel).instrument(span).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    target: "ems.pipeline",
                    device_id = device.device_id,
                    error = %err,
                    "poll_failed"
                );
                PollOutcome::Failed(err.to_string())
            }
        };
        record_poll_completed();
        outcome
    }
}
