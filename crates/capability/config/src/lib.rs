//! 采集进程运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// COV 缓存后端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovCacheBackend {
    /// 进程内缓存，重启后冷启动
    Memory,
    /// Redis 缓存，跨重启保留
    Redis,
}

/// 采集进程运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub scheduler_tick_ms: u64,
    pub default_poll_interval_ms: u64,
    pub cov_deadband_percent: f64,
    pub cov_heartbeat_seconds: u64,
    pub cov_cache: CovCacheBackend,
    pub redis_url: String,
    pub redis_cov_ttl_seconds: Option<u64>,
    pub queue_max_in_flight: usize,
    pub queue_rate_limit: usize,
    pub queue_rate_window_ms: u64,
    pub protocol_timeout_ms: u64,
    pub bacnet_enabled: bool,
    pub bacnet_bind_addr: String,
    pub modbus_enabled: bool,
    pub modbus_connect_timeout_ms: u64,
    pub history_table_prefix: String,
    pub export_view_name: String,
    pub provision_on_startup: bool,
    pub update_device_status: bool,
    pub retention_days: Option<u64>,
    pub retention_sweep_seconds: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("EMS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("EMS_DATABASE_URL".to_string()))?;
        let database_max_connections =
            read_u64_with_default("EMS_DATABASE_MAX_CONNECTIONS", 8)?.max(1) as u32;
        let scheduler_tick_ms = read_u64_with_default("EMS_SCHEDULER_TICK_MS", 1000)?.max(10);
        let default_poll_interval_ms =
            read_u64_with_default("EMS_DEFAULT_POLL_INTERVAL_MS", 60_000)?;
        let cov_deadband_percent = read_f64_with_default("EMS_COV_DEADBAND_PERCENT", 0.5)?;
        if !cov_deadband_percent.is_finite() || cov_deadband_percent < 0.0 {
            return Err(ConfigError::Invalid(
                "EMS_COV_DEADBAND_PERCENT".to_string(),
                cov_deadband_percent.to_string(),
            ));
        }
        let cov_heartbeat_seconds = read_u64_with_default("EMS_COV_HEARTBEAT_SECONDS", 3600)?;
        let cov_cache = match env::var("EMS_COV_CACHE") {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "" | "memory" => CovCacheBackend::Memory,
                "redis" => CovCacheBackend::Redis,
                _ => return Err(ConfigError::Invalid("EMS_COV_CACHE".to_string(), value)),
            },
            Err(_) => CovCacheBackend::Memory,
        };
        let redis_url =
            env::var("EMS_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let redis_cov_ttl_seconds =
            read_optional_u64("EMS_REDIS_COV_TTL_SECONDS")?.filter(|value| *value > 0);
        let queue_max_in_flight = read_u64_with_default("EMS_QUEUE_MAX_IN_FLIGHT", 20)?.max(1) as usize;
        let queue_rate_limit = read_u64_with_default("EMS_QUEUE_RATE_LIMIT", 10)?.max(1) as usize;
        let queue_rate_window_ms = read_u64_with_default("EMS_QUEUE_RATE_WINDOW_MS", 50)?;
        let protocol_timeout_ms = read_u64_with_default("EMS_PROTOCOL_TIMEOUT_MS", 3000)?.max(1);
        let bacnet_enabled = read_bool_with_default("EMS_BACNET", true)?;
        let bacnet_bind_addr =
            env::var("EMS_BACNET_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:47808".to_string());
        let modbus_enabled = read_bool_with_default("EMS_MODBUS", true)?;
        let modbus_connect_timeout_ms =
            read_u64_with_default("EMS_MODBUS_CONNECT_TIMEOUT_MS", 5000)?.max(1);
        let history_table_prefix = read_identifier_with_default("EMS_HISTORY_TABLE_PREFIX", "hist")?;
        let export_view_name =
            read_identifier_with_default("EMS_EXPORT_VIEW_NAME", "history_export")?;
        let provision_on_startup = read_bool_with_default("EMS_PROVISION_ON_STARTUP", true)?;
        let update_device_status = read_bool_with_default("EMS_UPDATE_DEVICE_STATUS", true)?;
        let retention_days = read_optional_u64("EMS_RETENTION_DAYS")?.filter(|value| *value > 0);
        let retention_sweep_seconds =
            read_u64_with_default("EMS_RETENTION_SWEEP_SECONDS", 3600)?.max(1);

        Ok(Self {
            database_url,
            database_max_connections,
            scheduler_tick_ms,
            default_poll_interval_ms,
            cov_deadband_percent,
            cov_heartbeat_seconds,
            cov_cache,
            redis_url,
            redis_cov_ttl_seconds,
            queue_max_in_flight,
            queue_rate_limit,
            queue_rate_window_ms,
            protocol_timeout_ms,
            bacnet_enabled,
            bacnet_bind_addr,
            modbus_enabled,
            modbus_connect_timeout_ms,
            history_table_prefix,
            export_view_name,
            provision_on_startup,
            update_device_status,
            retention_days,
            retention_sweep_seconds,
        })
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    pub fn default_poll_interval(&self) -> Duration {
        Duration::from_millis(self.default_poll_interval_ms)
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    /// 留存窗口（未启用时为空）。
    pub fn retention_horizon(&self) -> Option<Duration> {
        self.retention_days
            .map(|days| Duration::from_secs(days.saturating_mul(86_400)))
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

/// 读取开关；无法识别的取值报错，不静默当作关闭。
fn read_bool_with_default(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(value) = env::var(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

/// 读取会被拼接进 DDL 的标识符（仅允许小写字母、数字、下划线）。
fn read_identifier_with_default(key: &str, default: &str) -> Result<String, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    let valid = !value.is_empty()
        && value.len() <= 40
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !value.as_bytes()[0].is_ascii_digit();
    if !valid {
        return Err(ConfigError::Invalid(key.to_string(), value));
    }
    Ok(value)
}
