//! 内存存储实现模块
//!
//! 元数据与历史存储的内存实现仅用于测试和本地演示；
//! `InMemoryLastValueCache` 同时是 COV 缓存的默认后端。
//!
//! 包含以下实现：
//! - DeviceStore: InMemoryDeviceStore
//! - PointStore: InMemoryPointStore
//! - HistoryStore / ExportViewStore: InMemoryHistoryStore
//! - LastValueCache: InMemoryLastValueCache

pub mod device;
pub mod history;
pub mod last_value;
pub mod point;

pub use device::*;
pub use history::*;
pub use last_value::*;
pub use point::*;
