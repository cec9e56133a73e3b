use async_channel::{Receiver, Sender};
use chrono::Utc;
use common::{
    ErrorKind, ErrorReport, ErrorSink, SharedTask, TaskContext, TaskFailure, TaskOutput,
    TaskResult, WorkerId,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::PoolMetrics;

/// Estado observable de un worker (lo lee el loop de métricas del pool).
#[derive(Debug, Default)]
pub struct WorkerStatus {
    active: AtomicBool,
    tasks_processed: AtomicU64,
}

impl WorkerStatus {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }
}

/// Saca tareas de la cola compartida y las ejecuta de a una.
pub struct Worker {
    id: WorkerId,
    queue: Receiver<SharedTask>,
    results: Sender<TaskResult>,
    metrics: Arc<PoolMetrics>,
    errors: Option<Arc<dyn ErrorSink>>,
    status: Arc<WorkerStatus>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        queue: Receiver<SharedTask>,
        results: Sender<TaskResult>,
        metrics: Arc<PoolMetrics>,
        errors: Option<Arc<dyn ErrorSink>>,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            id,
            queue,
            results,
            metrics,
            errors,
            status,
        }
    }

    /// Loop principal: corre hasta que la cola se cierra (y queda vacía)
    /// o hasta que el pool cancela.
    pub async fn start(self, cancel: CancellationToken) {
        debug!("worker {} arrancado", self.id);

        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.queue.recv() => match next {
                    Ok(task) => task,
                    // cola cerrada y vacía
                    Err(_) => break,
                },
            };

            self.status.active.store(true, Ordering::Release);
            let result = self.execute_task(task, &cancel).await;
            self.status.active.store(false, Ordering::Release);
            self.status.tasks_processed.fetch_add(1, Ordering::Relaxed);
            self.metrics.release_slot();

            if self.results.send(result).await.is_err() {
                debug!("worker {}: stream de resultados cerrado, saliendo", self.id);
                break;
            }
        }

        debug!("worker {} terminado", self.id);
    }

    /// Ejecuta una tarea con su deadline y convierte cualquier desenlace
    /// (error, timeout, panic, cancelación) en un `TaskResult`.
    pub async fn execute_task(&self, task: SharedTask, cancel: &CancellationToken) -> TaskResult {
        let task_id = task.id().to_string();
        let chunk_id = task.chunk_id().map(str::to_string);
        let timeout = task.timeout().filter(|t| !t.is_zero());

        let ctx = TaskContext::new(self.id, cancel.child_token(), timeout);
        let deadline = ctx.deadline();

        debug!(
            "worker {} ejecutando tarea {} ({:?}, prioridad={}, timeout={:?})",
            self.id,
            task_id,
            task.kind(),
            task.priority(),
            timeout
        );

        let start_time = Utc::now();
        let started = Instant::now();

        let runner = {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.execute(ctx).await })
        };
        let outcome = supervise(runner, deadline, timeout, cancel).await;

        let duration = started.elapsed();
        let end_time = Utc::now();

        let (success, error, data) = match outcome {
            Ok(data) => {
                self.metrics.record_success(duration);
                debug!("tarea {} ok en {:?}", task_id, duration);
                (true, None, data)
            }
            Err(failure) => {
                self.metrics.record_failure(duration, failure.is_timeout());
                warn!(
                    "tarea {} falló en worker {}: {}",
                    task_id, self.id, failure
                );
                self.report(&task_id, &failure);
                (false, Some(failure), None)
            }
        };

        TaskResult {
            task_id,
            success,
            error,
            start_time,
            end_time,
            duration,
            chunk_id,
            data,
        }
    }

    fn report(&self, task_id: &str, failure: &TaskFailure) {
        let Some(sink) = &self.errors else {
            return;
        };

        let (kind, code) = match failure {
            TaskFailure::Timeout(_) => (ErrorKind::Timeout, "TASK_TIMEOUT"),
            TaskFailure::Panicked(_) => (ErrorKind::Unknown, "TASK_PANICKED"),
            TaskFailure::Cancelled => (ErrorKind::Timeout, "TASK_CANCELLED"),
            TaskFailure::Execution(_) => (ErrorKind::Generation, "TASK_EXECUTION_FAILED"),
        };

        sink.add_error(
            ErrorReport::new(kind, code, format!("tarea {task_id} falló: {failure}"))
                .with_context(format!("worker {}", self.id))
                .with_task(task_id),
        );
    }
}

/// Espera la ejecución respetando deadline y cancelación del pool.
/// La tarea corre en su propia tarea tokio, así que un panic vuelve como
/// `JoinError` y no tumba al worker.
async fn supervise(
    mut runner: JoinHandle<anyhow::Result<TaskOutput>>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<TaskOutput, TaskFailure> {
    let expired = async move {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        joined = &mut runner => match joined {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(TaskFailure::Execution(format!("{e:#}"))),
            Err(e) if e.is_panic() => Err(TaskFailure::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(TaskFailure::Cancelled),
        },
        _ = expired => {
            runner.abort();
            Err(TaskFailure::Timeout(timeout.unwrap_or_default()))
        }
        _ = cancel.cancelled() => {
            runner.abort();
            Err(TaskFailure::Cancelled)
        }
    };

    // Una tarea que coopera con el contexto puede devolver su propio error
    // justo al vencer el deadline: sigue siendo un timeout.
    match outcome {
        Err(TaskFailure::Execution(_)) if deadline.is_some_and(|d| Instant::now() >= d) => {
            Err(TaskFailure::Timeout(timeout.unwrap_or_default()))
        }
        Err(TaskFailure::Execution(_)) if cancel.is_cancelled() => Err(TaskFailure::Cancelled),
        other => other,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic sin mensaje".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{ErrorManager, Task};

    struct Scripted {
        id: &'static str,
        sleep: Duration,
        timeout: Option<Duration>,
        fail: bool,
        panic: bool,
    }

    impl Scripted {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                sleep: Duration::ZERO,
                timeout: None,
                fail: false,
                panic: false,
            }
        }
    }

    #[async_trait]
    impl Task for Scripted {
        async fn execute(&self, _ctx: TaskContext) -> anyhow::Result<TaskOutput> {
            tokio::time::sleep(self.sleep).await;
            if self.panic {
                panic!("explotó {}", self.id);
            }
            if self.fail {
                anyhow::bail!("falla programada");
            }
            Ok(Some(serde_json::json!({ "id": self.id })))
        }

        fn id(&self) -> &str {
            self.id
        }

        fn timeout(&self) -> Option<Duration> {
            self.timeout
        }
    }

    fn test_worker(errors: Option<Arc<dyn ErrorSink>>) -> (Worker, Arc<PoolMetrics>) {
        let (_tx, rx) = async_channel::bounded(1);
        let (res_tx, _res_rx) = async_channel::unbounded();
        let metrics = Arc::new(PoolMetrics::new());
        let worker = Worker::new(
            7,
            rx,
            res_tx,
            Arc::clone(&metrics),
            errors,
            Arc::new(WorkerStatus::default()),
        );
        (worker, metrics)
    }

    #[tokio::test]
    async fn tarea_exitosa_copia_datos_al_resultado() {
        let (worker, metrics) = test_worker(None);
        let result = worker
            .execute_task(Arc::new(Scripted::new("ok")), &CancellationToken::new())
            .await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.data, Some(serde_json::json!({ "id": "ok" })));
        assert!(result.end_time >= result.start_time);
        assert_eq!(metrics.snapshot().tasks_completed, 1);
    }

    #[tokio::test]
    async fn error_de_ejecucion_se_reporta_al_colector() {
        let manager = Arc::new(ErrorManager::new(10));
        let (worker, metrics) = test_worker(Some(manager.clone() as Arc<dyn ErrorSink>));

        let mut task = Scripted::new("mala");
        task.fail = true;
        let result = worker
            .execute_task(Arc::new(task), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(TaskFailure::Execution(ref m)) if m.contains("falla programada")));

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_failed, 1);
        assert_eq!(snap.tasks_timeout, 0);

        let errors = manager.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "TASK_EXECUTION_FAILED");
        assert_eq!(errors[0].context.as_deref(), Some("worker 7"));
        assert_eq!(errors[0].task_id.as_deref(), Some("mala"));
    }

    #[tokio::test]
    async fn tarea_lenta_se_clasifica_como_timeout() {
        let (worker, metrics) = test_worker(None);

        let mut task = Scripted::new("lenta");
        task.sleep = Duration::from_secs(5);
        task.timeout = Some(Duration::from_millis(30));

        let started = Instant::now();
        let result = worker
            .execute_task(Arc::new(task), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!result.success);
        assert!(result.is_timeout());

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_timeout, 1);
        assert_eq!(snap.tasks_failed, 1);
    }

    #[tokio::test]
    async fn panic_se_convierte_en_resultado_fallido() {
        let (worker, _metrics) = test_worker(None);

        let mut task = Scripted::new("panico");
        task.panic = true;
        let result = worker
            .execute_task(Arc::new(task), &CancellationToken::new())
            .await;

        assert!(!result.success);
        match result.error {
            Some(TaskFailure::Panicked(msg)) => assert!(msg.contains("explotó panico")),
            other => panic!("se esperaba Panicked, llegó {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelacion_del_pool_aborta_la_tarea() {
        let (worker, _metrics) = test_worker(None);
        let cancel = CancellationToken::new();

        let mut task = Scripted::new("eterna");
        task.sleep = Duration::from_secs(60);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = worker.execute_task(Arc::new(task), &cancel).await;
        assert_eq!(result.error, Some(TaskFailure::Cancelled));
    }

    #[tokio::test]
    async fn worker_sale_cuando_la_cola_se_cierra() {
        let (tx, rx) = async_channel::bounded::<SharedTask>(4);
        let (res_tx, res_rx) = async_channel::unbounded();
        let metrics = Arc::new(PoolMetrics::new());
        let status = Arc::new(WorkerStatus::default());
        let worker = Worker::new(0, rx, res_tx, Arc::clone(&metrics), None, Arc::clone(&status));

        for id in ["a", "b"] {
            metrics.reserve_slot();
            tx.try_send(Arc::new(Scripted::new(id)) as SharedTask).unwrap();
        }
        tx.close();

        worker.start(CancellationToken::new()).await;

        let mut ids = Vec::new();
        while let Ok(r) = res_rx.try_recv() {
            ids.push(r.task_id);
        }
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(status.tasks_processed(), 2);
        assert!(!status.is_active());
        assert_eq!(metrics.snapshot().queue_size, 0);
    }
}
