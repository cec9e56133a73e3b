use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::task::TaskId;

pub const DEFAULT_MAX_ERRORS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unknown,
    Parse,
    Generation,
    Validation,
    Config,
    Io,
    Memory,
    Timeout,
}

/// Error estructurado que los workers reportan al colector externo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    /// Código estable, ej: "TASK_EXECUTION_FAILED".
    pub code: String,
    pub message: String,
    /// Dónde pasó, ej: "worker 3".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            context: None,
            task_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] ({:?}) {}", self.code, self.kind, self.message)?;
        if let Some(ctx) = &self.context {
            write!(f, " context: {ctx}")?;
        }
        Ok(())
    }
}

/// Sumidero de errores que consumen los pools. El core no depende de
/// cómo se guarden.
pub trait ErrorSink: Send + Sync {
    fn add_error(&self, report: ErrorReport);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub errors_by_kind: HashMap<ErrorKind, usize>,
}

/// Colector en memoria con capacidad fija: al llenarse descarta el más viejo.
#[derive(Debug)]
pub struct ErrorManager {
    errors: RwLock<VecDeque<ErrorReport>>,
    max_size: usize,
}

impl ErrorManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            errors: RwLock::new(VecDeque::new()),
            max_size: max_size.max(1),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.read().is_empty()
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors.read().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.errors.write().clear();
    }

    pub fn summary(&self) -> ErrorSummary {
        let errors = self.errors.read();
        let mut errors_by_kind = HashMap::new();
        for e in errors.iter() {
            *errors_by_kind.entry(e.kind).or_insert(0) += 1;
        }
        ErrorSummary {
            total_errors: errors.len(),
            errors_by_kind,
        }
    }
}

impl Default for ErrorManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS)
    }
}

impl ErrorSink for ErrorManager {
    fn add_error(&self, report: ErrorReport) {
        debug!("error registrado: {}", report);
        let mut errors = self.errors.write();
        if errors.len() >= self.max_size {
            errors.pop_front();
        }
        errors.push_back(report);
    }
}
