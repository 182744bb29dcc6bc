//! # EMS Storage 模块
//!
//! 历史数据读写的存储抽象层。
//!
//! ## 模块说明
//!
//! - [`traits`]：`HistorySource`（历史序列读取）与 `TelemetryWriter`（读数写入）
//! - [`models`]：查询模型（`TimeRange`）
//! - [`error`]：存储错误类型，区分“设备不存在”与后端故障
//! - [`connection`]：PostgreSQL 连接池
//! - [`in_memory`]：内存实现（测试与本地演示，读写共用同一份序列）
//! - [`postgres`]：PostgreSQL 实现，读写 `telemetry_history` 表并通过 `devices`
//!   表按设备编码解析设备
//!
//! ## 数据库模式要求
//!
//! - `devices`：设备表（id, code, company_id）
//! - `telemetry_history`：遥测历史表（device_id, company_id, fecha, voltaje,
//!   corriente, potencia, created_at）
//!
//! 所有 SQL 使用参数绑定。

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod traits;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use traits::*;

pub use in_memory::InMemoryHistoryStore;
pub use postgres::{PgHistorySource, PgTelemetryWriter};
