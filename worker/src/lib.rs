pub mod metrics;
pub mod pool;
pub mod worker;

pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::WorkerPool;
pub use worker::{Worker, WorkerStatus};
