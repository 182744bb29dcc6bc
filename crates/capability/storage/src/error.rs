//! 存储层错误类型
//!
//! - 指定设备不存在（调用方据此返回 404）
//! - 后端错误（连接失败、SQL 执行错误、锁中毒）

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(err.to_string())
    }
}
