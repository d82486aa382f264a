//! 导出视图构建
//!
//! 全量替换：列出所有已登记表引用的点位，逐个确认表存在，再整体替换视图定义。
//! 代价与点位数量成正比，只在已建表集合变化后触发，不随采样写入触发。

use crate::error::StorageError;
use crate::traits::{ExportViewStore, HistoryStore, PointStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ExportViewBuilder {
    points: Arc<dyn PointStore>,
    history: Arc<dyn HistoryStore>,
    view: Arc<dyn ExportViewStore>,
}

impl ExportViewBuilder {
    pub fn new(
        points: Arc<dyn PointStore>,
        history: Arc<dyn HistoryStore>,
        view: Arc<dyn ExportViewStore>,
    ) -> Self {
        Self {
            points,
            history,
            view,
        }
    }

    /// 重建视图，返回视图包含的点位数
    pub async fn rebuild(&self) -> Result<usize, StorageError> {
        let result = self.rebuild_inner().await;
        ems_telemetry::record_view_rebuild(result.is_ok());
        match &result {
            Ok(sources) => info!(
                target: "ems.storage",
                view = %self.view.view_name(),
                sources,
                "export_view_rebuilt"
            ),
            Err(err) => warn!(
                target: "ems.storage",
                view = %self.view.view_name(),
                error = %err,
                "export_view_rebuild_failed"
            ),
        }
        result
    }

    async fn rebuild_inner(&self) -> Result<usize, StorageError> {
        let sources = self.points.list_provisioned_points().await?;
        for source in &sources {
            self.history.ensure_table(&source.table_name).await?;
        }
        self.view.replace_export_view(&sources).await?;
        Ok(sources.len())
    }
}
