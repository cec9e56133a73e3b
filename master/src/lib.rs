pub mod error;
pub mod processor;
pub mod queue;
pub mod scheduler;
pub mod smart_pool;
pub mod tasks;

pub use error::ProcessError;
pub use processor::{ConcurrentProcessor, ProcessSummary, ProcessorMetrics, ProcessorStats};
pub use queue::PriorityQueue;
pub use scheduler::TaskScheduler;
pub use smart_pool::{SmartPoolMetrics, SmartWorkerPool};
pub use tasks::{ChunkFn, ChunkTask, CodeGenTask, CodeGenerator, ParseTask, SchemaParser};
