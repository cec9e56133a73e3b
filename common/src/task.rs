use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::WorkerId;

pub type TaskId = String;

/// Lo que una tarea puede devolver además de "ok" (se copia al `TaskResult`).
pub type TaskOutput = Option<serde_json::Value>;

/// Tarea compartida entre la cola de prioridad, el grafo de dependencias
/// y los workers.
pub type SharedTask = Arc<dyn Task>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Parse,
    Chunk,
    CodeGen,
    Custom,
}

/// Unidad de trabajo planificable.
///
/// `id` tiene que ser único entre todas las tareas registradas a la vez en un
/// mismo pool: el grafo de dependencias indexa por este valor.
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<TaskOutput>;

    fn id(&self) -> &str;

    /// Mayor prioridad = se ejecuta antes.
    fn priority(&self) -> i32 {
        0
    }

    /// `None` => sin deadline propio, sólo la cancelación global del pool.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Custom
    }

    fn chunk_id(&self) -> Option<&str> {
        None
    }
}

/// Contexto de ejecución que el worker le pasa a cada tarea:
/// cancelación del pool + deadline propio de la tarea (si declaró timeout).
#[derive(Debug, Clone)]
pub struct TaskContext {
    worker_id: WorkerId,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    pub fn new(worker_id: WorkerId, cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            worker_id,
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Contexto suelto (tests, ejecuciones fuera de un pool).
    pub fn detached() -> Self {
        Self::new(0, CancellationToken::new(), None)
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Tiempo que le queda a la tarea antes de su deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Se resuelve cuando el pool cancela o vence el deadline, lo que pase primero.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Task for Noop {
        async fn execute(&self, _ctx: TaskContext) -> anyhow::Result<TaskOutput> {
            Ok(None)
        }

        fn id(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn valores_por_defecto_del_contrato() {
        let t = Noop;
        assert_eq!(t.priority(), 0);
        assert_eq!(t.timeout(), None);
        assert_eq!(t.kind(), TaskKind::Custom);
        assert!(t.chunk_id().is_none());
    }

    #[tokio::test]
    async fn contexto_con_deadline_vencido_queda_cancelado() {
        let ctx = TaskContext::new(1, CancellationToken::new(), Some(Duration::from_millis(10)));
        assert!(!ctx.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("el deadline debería resolver cancelled()");
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn cancelar_el_token_del_pool_cancela_el_contexto() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(3, token.child_token(), None);

        token.cancel();
        ctx.cancelled().await;

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.worker_id(), 3);
        assert!(ctx.remaining().is_none());
    }
}
