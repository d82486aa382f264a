//! 追踪初始化与采集指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 采集指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub tick_failures: u64,
    pub polls_dispatched: u64,
    pub polls_skipped_in_flight: u64,
    pub polls_completed: u64,
    pub devices_unreachable: u64,
    pub point_reads_ok: u64,
    pub point_reads_failed: u64,
    pub queue_timeouts: u64,
    pub samples_logged: u64,
    pub samples_suppressed: u64,
    pub samples_duplicate: u64,
    pub samples_dropped_unprovisioned: u64,
    pub write_failures: u64,
    pub tables_provisioned: u64,
    pub provision_failures: u64,
    pub table_refs_repaired: u64,
    pub view_rebuilds: u64,
    pub view_rebuild_failures: u64,
    pub retention_rows_pruned: u64,
}

/// 采集指标（进程级计数器）。
pub struct TelemetryMetrics {
    ticks: AtomicU64,
    tick_failures: AtomicU64,
    polls_dispatched: AtomicU64,
    polls_skipped_in_flight: AtomicU64,
    polls_completed: AtomicU64,
    devices_unreachable: AtomicU64,
    point_reads_ok: AtomicU64,
    point_reads_failed: AtomicU64,
    queue_timeouts: AtomicU64,
    samples_logged: AtomicU64,
    samples_suppressed: AtomicU64,
    samples_duplicate: AtomicU64,
    samples_dropped_unprovisioned: AtomicU64,
    write_failures: AtomicU64,
    tables_provisioned: AtomicU64,
    provision_failures: AtomicU64,
    table_refs_repaired: AtomicU64,
    view_rebuilds: AtomicU64,
    view_rebuild_failures: AtomicU64,
    retention_rows_pruned: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            polls_dispatched: AtomicU64::new(0),
            polls_skipped_in_flight: AtomicU64::new(0),
            polls_completed: AtomicU64::new(0),
            devices_unreachable: AtomicU64::new(0),
            point_reads_ok: AtomicU64::new(0),
            point_reads_failed: AtomicU64::new(0),
            queue_timeouts: AtomicU64::new(0),
            samples_logged: AtomicU64::new(0),
            samples_suppressed: AtomicU64::new(0),
            samples_duplicate: AtomicU64::new(0),
            samples_dropped_unprovisioned: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            tables_provisioned: AtomicU64::new(0),
            provision_failures: AtomicU64::new(0),
            table_refs_repaired: AtomicU64::new(0),
            view_rebuilds: AtomicU64::new(0),
            view_rebuild_failures: AtomicU64::new(0),
            retention_rows_pruned: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
            polls_dispatched: self.polls_dispatched.load(Ordering::Relaxed),
            polls_skipped_in_flight: self.polls_skipped_in_flight.load(Ordering::Relaxed),
            polls_completed: self.polls_completed.load(Ordering::Relaxed),
            devices_unreachable: self.devices_unreachable.load(Ordering::Relaxed),
            point_reads_ok: self.point_reads_ok.load(Ordering::Relaxed),
            point_reads_failed: self.point_reads_failed.load(Ordering::Relaxed),
            queue_timeouts: self.queue_timeouts.load(Ordering::Relaxed),
            samples_logged: self.samples_logged.load(Ordering::Relaxed),
            samples_suppressed: self.samples_suppressed.load(Ordering::Relaxed),
            samples_duplicate: self.samples_duplicate.load(Ordering::Relaxed),
            samples_dropped_unprovisioned: self
                .samples_dropped_unprovisioned
                .load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            tables_provisioned: self.tables_provisioned.load(Ordering::Relaxed),
            provision_failures: self.provision_failures.load(Ordering::Relaxed),
            table_refs_repaired: self.table_refs_repaired.load(Ordering::Relaxed),
            view_rebuilds: self.view_rebuilds.load(Ordering::Relaxed),
            view_rebuild_failures: self.view_rebuild_failures.load(Ordering::Relaxed),
            retention_rows_pruned: self.retention_rows_pruned.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成单次设备轮询的 poll_id（用于关联同一条流水线的日志）。
pub fn new_poll_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录调度 tick 次数。
pub fn record_tick() {
    metrics().ticks.fetch_add(1, Ordering::Relaxed);
}

/// 记录 tick 内元数据查询失败次数。
pub fn record_tick_failure() {
    metrics().tick_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录下发的设备流水线数量。
pub fn record_poll_dispatched() {
    metrics().polls_dispatched.fetch_add(1, Ordering::Relaxed);
}

/// 记录因上一轮仍在执行而跳过的设备次数。
pub fn record_poll_skipped_in_flight() {
    metrics()
        .polls_skipped_in_flight
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录完成的设备流水线数量。
pub fn record_poll_completed() {
    metrics().polls_completed.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备无响应次数。
pub fn record_device_unreachable() {
    metrics().devices_unreachable.fetch_add(1, Ordering::Relaxed);
}

/// 记录单点读取结果。
pub fn record_point_read(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.point_reads_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.point_reads_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录协议请求超时次数。
pub fn record_queue_timeout() {
    metrics().queue_timeouts.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入历史表的采样数。
pub fn record_sample_logged() {
    metrics().samples_logged.fetch_add(1, Ordering::Relaxed);
}

/// 记录被死区过滤的采样数。
pub fn record_sample_suppressed() {
    metrics().samples_suppressed.fetch_add(1, Ordering::Relaxed);
}

/// 记录时间戳重复（幂等忽略）的采样数。
pub fn record_sample_duplicate() {
    metrics().samples_duplicate.fetch_add(1, Ordering::Relaxed);
}

/// 记录因点位未建表而丢弃的采样数。
pub fn record_sample_dropped_unprovisioned() {
    metrics()
        .samples_dropped_unprovisioned
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录写入失败次数。
pub fn record_write_failure() {
    metrics().write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录建表（含登记引用）成功次数。
pub fn record_table_provisioned() {
    metrics().tables_provisioned.fetch_add(1, Ordering::Relaxed);
}

/// 记录建表失败次数。
pub fn record_provision_failure() {
    metrics().provision_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录表名引用修复次数。
pub fn record_table_ref_repaired() {
    metrics().table_refs_repaired.fetch_add(1, Ordering::Relaxed);
}

/// 记录导出视图重建结果。
pub fn record_view_rebuild(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.view_rebuilds.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.view_rebuild_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录留存清理删除的行数。
pub fn record_retention_pruned(rows: u64) {
    metrics()
        .retention_rows_pruned
        .fetch_add(rows, Ordering::Relaxed);
}
