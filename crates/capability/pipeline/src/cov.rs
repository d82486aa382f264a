//! COV（变化量）过滤：死区 + 心跳。
//!
//! 判定是纯函数 [`decide`]；[`ChangeDetector`] 负责读写最后记录值缓存。
//! 缓存只在采样被写入（或确认已存在）后才更新，写入失败的值会在下一轮重试。

use domain::LoggingMode;
use ems_storage::{CachedValue, LastValueCache, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 默认死区（百分比）
pub const DEFAULT_DEADBAND_PERCENT: f64 = 0.5;
/// 默认心跳上限
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
pub struct CovPolicy {
    pub deadband_percent: f64,
    /// 距上次记录超过该时长时，无论变化多少都记录一次
    pub heartbeat: Duration,
}

impl Default for CovPolicy {
    fn default() -> Self {
        Self {
            deadband_percent: DEFAULT_DEADBAND_PERCENT,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// 过滤判定结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovDecision {
    /// 缓存中没有该点位
    ColdStart,
    /// 设备为定时记录模式
    Interval,
    Heartbeat,
    /// 变化量达到死区
    Changed,
    Suppressed,
}

impl CovDecision {
    pub fn should_log(&self) -> bool {
        !matches!(self, Self::Suppressed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::Interval => "interval",
            Self::Heartbeat => "heartbeat",
            Self::Changed => "changed",
            Self::Suppressed => "suppressed",
        }
    }
}

/// 相对变化百分比；上次值为 0 时，新值为 0 记 0%，否则记 100%。
pub fn percent_change(last: f64, new: f64) -> f64 {
    if last == 0.0 {
        return if new == 0.0 { 0.0 } else { 100.0 };
    }
    ((new - last) / last).abs() * 100.0
}

pub fn decide(
    policy: &CovPolicy,
    mode: LoggingMode,
    cached: Option<CachedValue>,
    value: f64,
    ts_ms: i64,
) -> CovDecision {
    let Some(cached) = cached else {
        return CovDecision::ColdStart;
    };
    if mode == LoggingMode::Interval {
        return CovDecision::Interval;
    }
    let elapsed_ms = ts_ms.saturating_sub(cached.ts_ms);
    let heartbeat_ms = i64::try_from(policy.heartbeat.as_millis()).unwrap_or(i64::MAX);
    if elapsed_ms >= heartbeat_ms {
        return CovDecision::Heartbeat;
    }
    if percent_change(cached.value, value) >= policy.deadband_percent {
        return CovDecision::Changed;
    }
    CovDecision::Suppressed
}

/// 基于最后记录值缓存的变化检测器。
pub struct ChangeDetector {
    cache: Arc<dyn LastValueCache>,
    policy: CovPolicy,
}

impl ChangeDetector {
    pub fn new(cache: Arc<dyn LastValueCache>, policy: CovPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> &CovPolicy {
        &self.policy
    }

    /// 判定是否记录；缓存读取失败按冷启动处理。
    pub async fn evaluate(
        &self,
        point_id: i64,
        mode: LoggingMode,
        value: f64,
        ts_ms: i64,
    ) -> CovDecision {
        let cached = match self.cache.get(point_id).await {
            Ok(cached) => cached,
            Err(err) => {
                warn!(
                    target: "ems.pipeline",
                    point_id,
                    error = %err,
                    "cov_cache_read_failed"
                );
                None
            }
        };
        decide(&self.policy, mode, cached, value, ts_ms)
    }

    /// 采样落库后提交缓存。
    pub async fn record(&self, point_id: i64, value: f64, ts_ms: i64) -> Result<(), StorageError> {
        self.cache.set(point_id, value, ts_ms).await
    }
}
