use common::{PoolError, SplitError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("no se pudo enviar la tarea: {0}")]
    Submit(#[from] PoolError),

    #[error("no se pudo dividir el documento: {0}")]
    Split(#[from] SplitError),

    #[error("el procesamiento superó {0:?}")]
    Timeout(Duration),

    #[error("fallaron {failed} de {total} archivos")]
    PartialFailure { failed: usize, total: usize },
}
