use async_trait::async_trait;
use domain::{Device, DeviceStatus, LoggingMode, ProtocolKind};
use ems_pipeline::{DevicePoller, PollOutcome, PollScheduler, SchedulerConfig, TickOutcome};
use ems_storage::{DeviceStore, InMemoryDeviceStore, StorageError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn device(device_id: i64, interval_ms: u64) -> Device {
    Device {
        device_id,
        name: format!("dev-{}", device_id),
        protocol: ProtocolKind::Modbus,
        polling_interval_ms: Some(interval_ms),
        logging_mode: LoggingMode::Cov,
        status: DeviceStatus::Online,
        config: json!({ "host": "127.0.0.1" }),
    }
}

/// 每次轮询需要一个许可才能结束
struct GatedPoller {
    gate: Semaphore,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

impl GatedPoller {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DevicePoller for GatedPoller {
    async fn poll_device(&self, _device: Device, _cancel: CancellationToken) -> PollOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate");
        permit.forget();
        self.running.fetch_sub(1, Ordering::SeqCst);
        PollOutcome::Cancelled
    }
}

async fn wait_until_idle(scheduler: &PollScheduler) {
    for _ in 0..200 {
        if scheduler.in_flight_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pipelines still in flight");
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        tick: Duration::from_millis(10),
        default_interval: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn slow_device_is_never_polled_concurrently() {
    let store = Arc::new(InMemoryDeviceStore::new());
    store.insert(device(1, 1)).unwrap();
    let poller = Arc::new(GatedPoller::new());
    let scheduler = PollScheduler::new(store, poller.clone(), config());

    let first = scheduler.tick().await;
    assert_eq!(
        first,
        TickOutcome::Completed {
            dispatched: 1,
            skipped_in_flight: 0,
            not_due: 0
        }
    );

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = scheduler.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed {
                dispatched: 0,
                skipped_in_flight: 1,
                not_due: 0
            }
        );
    }
    assert_eq!(scheduler.in_flight_count(), 1);

    poller.gate.add_permits(1);
    wait_until_idle(&scheduler).await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcome = scheduler.tick().await;
    assert!(matches!(outcome, TickOutcome::Completed { dispatched: 1, .. }));

    poller.gate.add_permits(1);
    scheduler.drain().await;
    assert_eq!(poller.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(poller.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn device_is_not_due_before_its_interval() {
    let store = Arc::new(InMemoryDeviceStore::new());
    store.insert(device(1, 60_000)).unwrap();
    let poller = Arc::new(GatedPoller::new());
    poller.gate.add_permits(10);
    let scheduler = PollScheduler::new(store, poller.clone(), config());

    scheduler.tick().await;
    wait_until_idle(&scheduler).await;
    let outcome = scheduler.tick().await;
    assert_eq!(
        outcome,
        TickOutcome::Completed {
            dispatched: 0,
            skipped_in_flight: 0,
            not_due: 1
        }
    );
    scheduler.drain().await;
}

#[tokio::test]
async fn devices_are_dispatched_independently() {
    let store = Arc::new(InMemoryDeviceStore::new());
    for id in 1..=3 {
        store.insert(device(id, 1)).unwrap();
    }
    let poller = Arc::new(GatedPoller::new());
    let scheduler = PollScheduler::new(store, poller.clone(), config());

    let outcome = scheduler.tick().await;
    assert!(matches!(outcome, TickOutcome::Completed { dispatched: 3, .. }));
    assert_eq!(scheduler.in_flight_count(), 3);

    poller.gate.add_permits(3);
    scheduler.drain().await;
    assert_eq!(scheduler.in_flight_count(), 0);
}

/// 第一次查询失败，之后由内存存储应答
struct FlakyDevices {
    inner: InMemoryDeviceStore,
    failures: AtomicUsize,
}

#[async_trait]
impl DeviceStore for FlakyDevices {
    async fn list_pollable_devices(&self) -> Result<Vec<Device>, StorageError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(StorageError::new("connection refused"));
        }
        self.inner.list_pollable_devices().await
    }

    async fn find_device(&self, device_id: i64) -> Result<Option<Device>, StorageError> {
        self.inner.find_device(device_id).await
    }

    async fn set_device_status(
        &self,
        device_id: i64,
        status: DeviceStatus,
    ) -> Result<(), StorageError> {
        self.inner.set_device_status(device_id, status).await
    }
}

#[tokio::test]
async fn failed_device_query_ends_tick_but_not_scheduler() {
    let inner = InMemoryDeviceStore::new();
    inner.insert(device(1, 1)).unwrap();
    let store = Arc::new(FlakyDevices {
        inner,
        failures: AtomicUsize::new(1),
    });
    let poller = Arc::new(GatedPoller::new());
    poller.gate.add_permits(1);
    let scheduler = PollScheduler::new(store, poller.clone(), config());

    assert!(matches!(scheduler.tick().await, TickOutcome::Failed(_)));
    assert!(matches!(
        scheduler.tick().await,
        TickOutcome::Completed { dispatched: 1, .. }
    ));
    scheduler.drain().await;
}

/// 查询阻塞直到放行，用于制造重入
struct BlockingDevices {
    gate: Semaphore,
    entered: AtomicUsize,
}

#[async_trait]
impl DeviceStore for BlockingDevices {
    async fn list_pollable_devices(&self) -> Result<Vec<Device>, StorageError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate");
        permit.forget();
        Ok(Vec::new())
    }

    async fn find_device(&self, _device_id: i64) -> Result<Option<Device>, StorageError> {
        Ok(None)
    }

    async fn set_device_status(
        &self,
        _device_id: i64,
        _status: DeviceStatus,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let store = Arc::new(BlockingDevices {
        gate: Semaphore::new(0),
        entered: AtomicUsize::new(0),
    });
    let scheduler = PollScheduler::new(store.clone(), Arc::new(GatedPoller::new()), config());

    let background = scheduler.clone();
    let first = tokio::spawn(async move { background.tick().await });
    while store.entered.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(scheduler.tick().await, TickOutcome::Skipped);
    store.gate.add_permits(1);
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, TickOutcome::Completed { dispatched: 0, .. }));
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let store = Arc::new(InMemoryDeviceStore::new());
    store.insert(device(1, 1)).unwrap();
    let poller = Arc::new(GatedPoller::new());
    poller.gate.add_permits(1_000);
    let scheduler = PollScheduler::new(store, poller.clone(), config());

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run exits")
        .unwrap();
    scheduler.drain().await;
    assert!(poller.calls.load(Ordering::SeqCst) >= 1);
}
