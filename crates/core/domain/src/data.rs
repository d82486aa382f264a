/// 默认质量标记。
pub const QUALITY_GOOD: &str = "good";

/// 单点读取状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    Error,
}

/// 单点读取结果（协议无关）。
#[derive(Debug, Clone)]
pub struct PointReading {
    pub point_id: i64,
    pub value: Option<f64>,
    pub status: ReadStatus,
    pub quality: String,
    /// 读取发起时间（毫秒）
    pub ts_ms: i64,
    pub error: Option<String>,
}

impl PointReading {
    pub fn ok(point_id: i64, value: f64, quality: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            point_id,
            value: Some(value),
            status: ReadStatus::Ok,
            quality: quality.into(),
            ts_ms,
            error: None,
        }
    }

    pub fn error(point_id: i64, error: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            point_id,
            value: None,
            status: ReadStatus::Error,
            quality: "error".to_string(),
            ts_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReadStatus::Ok
    }
}

/// 设备级读取结果。
///
/// `success = false` 表示设备本身无响应，此时 `readings` 为空；
/// 单点失败体现在 `PointReading::status` 上。
#[derive(Debug, Clone)]
pub struct DeviceReadResult {
    pub device_id: i64,
    pub success: bool,
    pub readings: Vec<PointReading>,
    pub error: Option<String>,
}

impl DeviceReadResult {
    pub fn completed(device_id: i64, readings: Vec<PointReading>) -> Self {
        Self {
            device_id,
            success: true,
            readings,
            error: None,
        }
    }

    pub fn unreachable(device_id: i64, error: impl Into<String>) -> Self {
        Self {
            device_id,
            success: false,
            readings: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// 历史采样值（写入单个点位表）。
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub ts_ms: i64,
    pub value: f64,
    pub quality: String,
}

/// 获取当前时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
