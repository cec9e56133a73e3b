use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::task::TaskId;

/// Por qué falló una ejecución.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskFailure {
    /// `execute` devolvió error.
    Execution(String),
    /// Venció el timeout propio de la tarea.
    Timeout(Duration),
    /// La tarea hizo panic; el worker sigue vivo.
    Panicked(String),
    /// El pool se detuvo a la fuerza con la tarea en vuelo.
    Cancelled,
}

impl TaskFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskFailure::Timeout(_))
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskFailure::Execution(msg) => write!(f, "error de ejecución: {msg}"),
            TaskFailure::Timeout(t) => write!(f, "timeout tras {t:?}"),
            TaskFailure::Panicked(msg) => write!(f, "panic: {msg}"),
            TaskFailure::Cancelled => write!(f, "cancelada por parada del pool"),
        }
    }
}

/// Resultado de una ejecución. Uno por tarea ejecutada, inmutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    pub error: Option<TaskFailure>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TaskResult {
    pub fn is_timeout(&self) -> bool {
        self.error.as_ref().is_some_and(TaskFailure::is_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializa_fallo_con_etiqueta() {
        let now = Utc::now();
        let result = TaskResult {
            task_id: "t1".to_string(),
            success: false,
            error: Some(TaskFailure::Execution("boom".to_string())),
            start_time: now,
            end_time: now,
            duration: Duration::from_millis(5),
            chunk_id: None,
            data: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"]["kind"], "EXECUTION");
        assert_eq!(json["error"]["detail"], "boom");
        assert!(json.get("chunk_id").is_none());
        assert!(!result.is_timeout());
    }

    #[test]
    fn timeout_se_distingue_de_otros_fallos() {
        assert!(TaskFailure::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!TaskFailure::Cancelled.is_timeout());
        assert!(!TaskFailure::Panicked("x".into()).is_timeout());
    }
}
