//! 采集流水线
//!
//! ```text
//! PollScheduler ──tick──► DevicePoller (HistoryPipeline)
//!                              │ list_points / read_points
//!                              ▼
//!                         ChangeDetector ──► TableProvisioner ──► HistoryStore
//!                              ▲                                      │
//!                              └────────── LastValueCache ◄───────────┘ (写入后提交)
//! ```
//!
//! - [`scheduler`]：固定周期 tick，同一设备最多一个在途流水线
//! - [`device_poll`]：单设备一轮采集
//! - [`cov`]：死区 + 心跳过滤
//! - [`retention`]：按留存窗口清理历史表
//! - [`reconcile`]：启动时建表与视图对账

pub mod cov;
pub mod device_poll;
pub mod error;
pub mod reconcile;
pub mod retention;
pub mod scheduler;

pub use cov::{ChangeDetector, CovDecision, CovPolicy, decide, percent_change};
pub use device_poll::{DevicePoller, HistoryPipeline, PollOutcome, PollSummary};
pub use error::PipelineError;
pub use reconcile::reconcile_tables;
pub use retention::{RetentionSweeper, SweepReport};
pub use scheduler::{PollScheduler, SchedulerConfig, TickOutcome};
