//! 内存存储实现
//!
//! 仅用于测试和本地演示。

pub mod history;

pub use history::InMemoryHistoryStore;
