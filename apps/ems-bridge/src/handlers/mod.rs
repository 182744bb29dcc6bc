//! Handlers 模块

pub mod health;
pub mod outages;
pub mod snapshot;
pub mod stats;
pub mod stream;
pub mod ws;

pub use health::*;
pub use outages::*;
pub use snapshot::*;
pub use stats::*;
pub use stream::*;
pub use ws::*;
