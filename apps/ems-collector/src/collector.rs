//! 采集进程装配模块
//!
//! 把存储、COV 缓存、协议队列与适配器、建表器、流水线和调度器组装成一个可运行的采集器。
//! 每个协议接口一个读请求队列，同一接口下的设备共享限流。

use ems_config::{AppConfig, CovCacheBackend};
use ems_pipeline::{
    ChangeDetector, CovPolicy, HistoryPipeline, PollScheduler, RetentionSweeper, SchedulerConfig,
    reconcile_tables,
};
use ems_protocol::{
    BacnetAdapter, BacnetIpClient, DevicePointReader, ModbusAdapter, ModbusTcpTransport,
    ProtocolAdapter, QueueConfig, RequestQueue,
};
use ems_storage::{
    DeviceStore, InMemoryLastValueCache, LastValueCache, PgDeviceStore, PgExportViewStore,
    PgHistoryStore, PgPointStore, PointStore, RedisLastValueCache, TableProvisioner, connect_pool,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 组装完成的采集器
pub struct Collector {
    pub scheduler: PollScheduler,
    devices: Arc<dyn DeviceStore>,
    provisioner: Arc<TableProvisioner>,
    retention: Option<RetentionSweeper>,
    provision_on_startup: bool,
    /// 调度器之外的后台任务（留存清理）
    background: TaskTracker,
}

impl Collector {
    pub async fn build(config: &AppConfig) -> Result<Self, BoxError> {
        // 1. 数据库与存储
        let pool = connect_pool(&config.database_url, config.database_max_connections).await?;
        let devices: Arc<dyn DeviceStore> = Arc::new(PgDeviceStore::new(pool.clone()));
        let points: Arc<dyn PointStore> = Arc::new(PgPointStore::new(pool.clone()));
        let history = Arc::new(PgHistoryStore::new(
            pool.clone(),
            config.history_table_prefix.clone(),
        ));
        let view = Arc::new(PgExportViewStore::new(pool, config.export_view_name.clone()));
        let provisioner = Arc::new(TableProvisioner::new(
            devices.clone(),
            points.clone(),
            history.clone(),
            view,
        ));

        // 2. COV 缓存
        let cache: Arc<dyn LastValueCache> = match config.cov_cache {
            CovCacheBackend::Memory => Arc::new(InMemoryLastValueCache::new()),
            CovCacheBackend::Redis => Arc::new(RedisLastValueCache::connect(
                &config.redis_url,
                config.redis_cov_ttl_seconds,
            )?),
        };
        let detector = ChangeDetector::new(
            cache,
            CovPolicy {
                deadband_percent: config.cov_deadband_percent,
                heartbeat: Duration::from_secs(config.cov_heartbeat_seconds),
            },
        );

        // 3. 协议接口
        let reader = Arc::new(build_reader(config).await?);

        // 4. 流水线与调度器
        let pipeline = HistoryPipeline::new(
            devices.clone(),
            points.clone(),
            reader,
            detector,
            provisioner.clone(),
        )
        .with_status_updates(config.update_device_status);
        let scheduler = PollScheduler::new(
            devices.clone(),
            Arc::new(pipeline),
            SchedulerConfig {
                tick: config.scheduler_tick(),
                default_interval: config.default_poll_interval(),
            },
        );

        let retention = config.retention_horizon().map(|horizon| {
            RetentionSweeper::new(
                points,
                history,
                horizon,
                Duration::from_secs(config.retention_sweep_seconds),
            )
        });

        info!(
            target: "ems.collector",
            cov_cache = ?config.cov_cache,
            bacnet = config.bacnet_enabled,
            modbus = config.modbus_enabled,
            retention_days = ?config.retention_days,
            "collector_assembled"
        );
        Ok(Self {
            scheduler,
            devices,
            provisioner,
            retention,
            provision_on_startup: config.provision_on_startup,
            background: TaskTracker::new(),
        })
    }

    /// 启动对账；失败只记录日志，流水线会按需懒建表。
    pub async fn reconcile(&self) {
        if !self.provision_on_startup {
            return;
        }
        if let Err(err) = reconcile_tables(self.devices.as_ref(), &self.provisioner).await {
            warn!(target: "ems.collector", error = %err, "startup_reconcile_failed");
        }
    }

    /// 在后台启动留存清理（未配置留存窗口时不启动）。
    pub fn spawn_retention(&mut self, cancel: CancellationToken) {
        if let Some(sweeper) = self.retention.take() {
            self.background
                .spawn(async move { sweeper.run(cancel).await });
        }
    }

    /// 等待后台任务退出（需先取消其令牌）。
    pub async fn drain_background(&self) {
        self.background.close();
        self.background.wait().await;
        info!(target: "ems.collector", "background_tasks_drained");
    }
}

fn queue_config(config: &AppConfig) -> QueueConfig {
    QueueConfig {
        max_in_flight: config.queue_max_in_flight,
        rate_limit: config.queue_rate_limit,
        rate_window: Duration::from_millis(config.queue_rate_window_ms),
        op_timeout: config.protocol_timeout(),
    }
}

async fn build_reader(config: &AppConfig) -> Result<DevicePointReader, BoxError> {
    let mut reader = DevicePointReader::new();
    if config.bacnet_enabled {
        let client = BacnetIpClient::bind(&config.bacnet_bind_addr).await?;
        let queue = Arc::new(RequestQueue::new("bacnet_ip", queue_config(config)));
        reader = reader.with_adapter(ProtocolAdapter::Bacnet(BacnetAdapter::new(
            queue,
            Arc::new(client),
        )));
    }
    if config.modbus_enabled {
        let transport = ModbusTcpTransport::new(Duration::from_millis(
            config.modbus_connect_timeout_ms,
        ));
        let queue = Arc::new(RequestQueue::new("modbus_tcp", queue_config(config)));
        reader = reader.with_adapter(ProtocolAdapter::Modbus(ModbusAdapter::new(
            queue,
            Arc::new(transport),
        )));
    }
    Ok(reader)
}
