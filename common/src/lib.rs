pub mod chunk;
pub mod config;
pub mod dag;
pub mod error;
pub mod reporting;
pub mod results;
pub mod task;

/* --------- Contrato de tareas y resultados --------- */

pub use results::{TaskFailure, TaskResult};
pub use task::{SharedTask, Task, TaskContext, TaskId, TaskKind, TaskOutput};

/* --------- Chunks y dependencias --------- */

pub use chunk::{chunk_priority, Chunk, ChunkId, DependencyExtractor, NoDependencies, XsdSplitter};
pub use dag::{DependencyGraph, Registration};

/* --------- Errores y configuración --------- */

pub use config::{EngineConfig, SplitterConfig};
pub use error::{ConfigError, PoolError, SplitError};
pub use reporting::{ErrorKind, ErrorManager, ErrorReport, ErrorSink, ErrorSummary};

pub type WorkerId = usize;
