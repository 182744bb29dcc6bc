//! # PostgreSQL 存储实现模块
//!
//! - **PgHistorySource** (`history.rs`)：按设备与时间范围读取 `telemetry_history`
//! - **PgTelemetryWriter** (`telemetry.rs`)：批量写入设备读数
//!
//! 设备既可用编码（`devices.code`）也可用 ID 文本定位。视在功率与功率因数
//! 由电压、电流、有功功率在查询中派生，表中不单独存储。

pub mod history;
pub mod telemetry;

pub use history::PgHistorySource;
pub use telemetry::PgTelemetryWriter;
