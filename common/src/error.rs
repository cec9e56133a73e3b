use std::time::Duration;
use thiserror::Error;

/// Errores a nivel de pool. Los fallos de cada tarea nunca llegan aquí:
/// viajan en su `TaskResult`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("el pool de workers está detenido")]
    Stopped,

    #[error("la cola de tareas está llena (capacidad {capacity})")]
    QueueFull { capacity: usize },

    #[error("el pool no terminó de vaciarse en {0:?}; se canceló el trabajo pendiente")]
    StopTimeout(Duration),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("configuración de splitter inválida: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_workers tiene que ser mayor que 0")]
    NoWorkers,

    #[error("queue_size tiene que ser mayor que 0")]
    EmptyQueue,

    #[error(transparent)]
    Splitter(#[from] SplitError),
}
