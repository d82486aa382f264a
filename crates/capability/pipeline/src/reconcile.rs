//! 启动对账：为所有可调度设备建表并重建导出视图。

use crate::error::PipelineError;
use ems_storage::{DeviceStore, ProvisionReport, TableProvisioner};
use tracing::info;

pub async fn reconcile_tables(
    devices: &dyn DeviceStore,
    provisioner: &TableProvisioner,
) -> Result<ProvisionReport, PipelineError> {
    let device_ids: Vec<i64> = devices
        .list_pollable_devices()
        .await?
        .iter()
        .map(|device| device.device_id)
        .collect();
    let report = provisioner
        .reconcile(&device_ids)
        .await
        .map_err(|err| PipelineError::Provision(err.to_string()))?;
    info!(
        target: "ems.pipeline",
        devices = device_ids.len(),
        provisioned = report.provisioned,
        repaired = report.repaired,
        failed = report.failed,
        "startup_reconcile_completed"
    );
    Ok(report)
}
