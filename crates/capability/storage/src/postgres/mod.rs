//! # PostgreSQL 存储实现模块
//!
//! ## 包含的实现
//!
//! - **DeviceStore** (`device.rs`)：设备元数据读取与状态更新
//! - **PointStore** (`point.rs`)：点位元数据读取与历史表引用登记
//! - **HistoryStore** (`history.rs`)：按点位动态建表、写入、查询、留存删除
//! - **ExportViewStore** (`export_view.rs`)：跨点位表的 `union all` 导出视图
//!
//! ## 数据库模式要求
//!
//! - `devices`：设备表（device_id, name, protocol, polling_interval_ms, logging_mode, status, config jsonb）
//! - `points`：点位表（point_id, device_id, name, object_type, object_instance, register_type,
//!   register_address, config jsonb, is_monitor, is_history_enabled, table_name）
//!
//! 参考建表脚本见 `migrations/0001_acquisition.sql`。
//!
//! ## 安全考虑
//!
//! - 值一律使用参数绑定（`$1`, `$2` 等）
//! - 动态表名/视图名拼接前必须通过 `ensure_identifier`
//! - 视图中的设备名、点位名以转义后的字面量出现

pub mod device;
pub mod export_view;
pub mod history;
pub mod point;

pub use device::*;
pub use export_view::*;
pub use history::*;
pub use point::*;
