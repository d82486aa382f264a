//! 历史表留存清理
//!
//! 表名用与建表相同的命名函数重新计算；单表失败只记录日志，不中断本轮。

use crate::error::PipelineError;
use domain::now_epoch_ms;
use ems_storage::{HistoryStore, PointStore};
use ems_telemetry::record_retention_pruned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tables: usize,
    pub rows_pruned: u64,
    pub failures: usize,
}

pub struct RetentionSweeper {
    points: Arc<dyn PointStore>,
    history: Arc<dyn HistoryStore>,
    horizon: Duration,
    period: Duration,
}

impl RetentionSweeper {
    pub fn new(
        points: Arc<dyn PointStore>,
        history: Arc<dyn HistoryStore>,
        horizon: Duration,
        period: Duration,
    ) -> Self {
        Self {
            points,
            history,
            horizon,
            period,
        }
    }

    /// 清理 `now_ms - horizon` 之前的数据。
    pub async fn sweep_once(&self, now_ms: i64) -> Result<SweepReport, PipelineError> {
        let horizon_ms = i64::try_from(self.horizon.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = now_ms.saturating_sub(horizon_ms);
        let sources = self.points.list_provisioned_points().await?;

        let mut seen = HashSet::new();
        let mut report = SweepReport::default();
        for source in &sources {
            let table = self
                .history
                .table_name(&source.device_name, &source.point_name);
            if !seen.insert(table.clone()) {
                continue;
            }
            report.tables += 1;
            match self.history.prune_before(&table, cutoff_ms).await {
                Ok(rows) => {
                    report.rows_pruned += rows;
                    record_retention_pruned(rows);
                }
                Err(err) => {
                    report.failures += 1;
                    warn!(
                        target: "ems.retention",
                        table = %table,
                        error = %err,
                        "retention_prune_failed"
                    );
                }
            }
        }
        info!(
            target: "ems.retention",
            cutoff_ms,
            tables = report.tables,
            rows_pruned = report.rows_pruned,
            failures = report.failures,
            "retention_sweep_completed"
        );
        Ok(report)
    }

    /// 周期清理，直到令牌取消。
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.sweep_once(now_epoch_ms()).await {
                        warn!(target: "ems.retention", error = %err, "retention_sweep_failed");
                    }
                }
            }
        }
    }
}
