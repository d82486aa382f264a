//! 轮询调度器
//!
//! 固定周期 tick；每个到期设备派发一个独立任务。保证：
//! - 同一时刻 tick 不重入；
//! - 同一设备最多一个在途流水线（在途集合 + 派发前写入 last_poll）。

use crate::device_poll::DevicePoller;
use domain::Device;
use ems_storage::DeviceStore;
use ems_telemetry::{
    record_poll_dispatched, record_poll_skipped_in_flight, record_tick, record_tick_failure,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    /// 设备未配置轮询间隔时使用
    pub default_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            default_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// 上一次 tick 尚未结束
    Skipped,
    /// 设备查询失败
    Failed(String),
    Completed {
        dispatched: usize,
        skipped_in_flight: usize,
        not_due: usize,
    },
}

type InFlightSet = Arc<Mutex<HashSet<i64>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 在途标记；任务结束（含 panic）时释放。
struct InFlightGuard {
    set: InFlightSet,
    device_id: i64,
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, device_id: i64) -> Option<Self> {
        if !lock(set).insert(device_id) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            device_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.device_id);
    }
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct SchedulerInner {
    devices: Arc<dyn DeviceStore>,
    poller: Arc<dyn DevicePoller>,
    config: SchedulerConfig,
    ticking: AtomicBool,
    last_poll: Mutex<HashMap<i64, Instant>>,
    in_flight: InFlightSet,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollScheduler {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        poller: Arc<dyn DevicePoller>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                devices,
                poller,
                config,
                ticking: AtomicBool::new(false),
                last_poll: Mutex::new(HashMap::new()),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// 定时循环，直到 [`Self::shutdown`] 被调用。
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.inner.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            target: "ems.scheduler",
            tick_ms = self.inner.config.tick.as_millis() as u64,
            "scheduler_started"
        );
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(target: "ems.scheduler", "scheduler_stopped");
    }

    /// 执行一次调度。
    pub async fn tick(&self) -> TickOutcome {
        if self
            .inner
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target: "ems.scheduler", "tick_skipped");
            return TickOutcome::Skipped;
        }
        let _guard = TickGuard(&self.inner.ticking);
        record_tick();

        let devices = match self.inner.devices.list_pollable_devices().await {
            Ok(devices) => devices,
            Err(err) => {
                record_tick_failure();
                warn!(target: "ems.scheduler", error = %err, "tick_device_query_failed");
                return TickOutcome::Failed(err.to_string());
            }
        };

        let now = Instant::now();
        let mut dispatched = 0;
        let mut skipped_in_flight = 0;
        let mut not_due = 0;
        for device in devices {
            if self.inner.cancel.is_cancelled() {
                break;
            }
            if !self.is_due(&device, now) {
                not_due += 1;
                continue;
            }
            let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight, device.device_id)
            else {
                skipped_in_flight += 1;
                record_poll_skipped_in_flight();
                debug!(
                    target: "ems.scheduler",
                    device_id = device.device_id,
                    "poll_skipped_in_flight"
                );
                continue;
            };
            lock(&self.inner.last_poll).insert(device.device_id, now);
            self.dispatch(device, guard);
            dispatched += 1;
        }

        TickOutcome::Completed {
            dispatched,
            skipped_in_flight,
            not_due,
        }
    }

    /// 取消所有流水线并停止调度循环。
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// 等待所有在途流水线结束。
    pub async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!(target: "ems.scheduler", "scheduler_drained");
    }

    fn is_due(&self, device: &Device, now: Instant) -> bool {
        let interval = device.polling_interval(self.inner.config.default_interval);
        match lock(&self.inner.last_poll).get(&device.device_id) {
            Some(last) => now.saturating_duration_since(*last) >= interval,
            None => true,
        }
    }

    fn dispatch(&self, device: Device, guard: InFlightGuard) {
        record_poll_dispatched();
        info!(
            target: "ems.scheduler",
            device_id = device.device_id,
            device = %device.name,
            protocol = %device.protocol,
            "poll_dispatched"
        );
        let poller = self.inner.poller.clone();
        let token = self.inner.cancel.child_token();
        self.inner.tracker.spawn(async move {
            let _guard = guard;
            poller.poll_device(device, token).await;
        });
    }
}
