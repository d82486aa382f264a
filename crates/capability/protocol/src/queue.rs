//! 协议读请求队列
//!
//! 每个协议接口一个实例，所有经过该接口的读请求共享同一组限流参数：
//!
//! - 同时在途请求数上限（`max_in_flight`）
//! - 滑动窗口准入速率（`rate_limit` 次 / `rate_window`）
//! - 单次请求超时（`op_timeout`）
//!
//! 准入顺序为 FIFO：tokio 的 `Mutex` 与 `Semaphore` 都是公平的，先排队的请求先获得许可。

use crate::error::ProtocolError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// 队列限流参数
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_in_flight: usize,
    pub rate_limit: usize,
    /// 为 0 时不做速率限制
    pub rate_window: Duration,
    pub op_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 20,
            rate_limit: 10,
            rate_window: Duration::from_millis(50),
            op_timeout: Duration::from_secs(3),
        }
    }
}

/// 队列计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// 协议读请求队列
pub struct RequestQueue {
    name: String,
    config: QueueConfig,
    /// 准入锁，内部保存窗口内的准入时刻
    admission: Mutex<VecDeque<Instant>>,
    permits: Arc<Semaphore>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl RequestQueue {
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        let config = QueueConfig {
            max_in_flight: config.max_in_flight.max(1),
            rate_limit: config.rate_limit.max(1),
            ..config
        };
        Self {
            name: name.into(),
            admission: Mutex::new(VecDeque::with_capacity(config.rate_limit)),
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 当前在途请求数
    pub fn in_flight(&self) -> usize {
        self.config
            .max_in_flight
            .saturating_sub(self.permits.available_permits())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    /// 排队执行一次协议操作。
    ///
    /// `op` 在获得准入后才会被 poll；超时或失败只影响本次请求。
    pub async fn submit<T, F>(&self, op: F) -> Result<T, ProtocolError>
    where
        F: Future<Output = Result<T, ProtocolError>>,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);

        let permit = {
            let mut window = self.admission.lock().await;
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ProtocolError::ChannelClosed)?;
            self.wait_for_rate_slot(&mut window).await;
            permit
        };

        let result = match tokio::time::timeout(self.config.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                ems_telemetry::record_queue_timeout();
                debug!(
                    target: "ems.protocol",
                    queue = %self.name,
                    timeout_ms = self.config.op_timeout.as_millis() as u64,
                    "queued_request_timeout"
                );
                Err(ProtocolError::Timeout(format!(
                    "{} request exceeded {}ms",
                    self.name,
                    self.config.op_timeout.as_millis()
                )))
            }
        };
        drop(permit);

        match &result {
            Ok(_) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn wait_for_rate_slot(&self, window: &mut VecDeque<Instant>) {
        if self.config.rate_window.is_zero() {
            return;
        }
        loop {
            let now = Instant::now();
            while let Some(front) = window.front() {
                if now.duration_since(*front) >= self.config.rate_window {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() < self.config.rate_limit {
                window.push_back(now);
                return;
            }
            match window.front() {
                Some(oldest) => tokio::time::sleep_until(*oldest + self.config.rate_window).await,
                None => return,
            }
        }
    }
}
