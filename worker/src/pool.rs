use async_channel::{Receiver, Sender, TrySendError};
use common::{EngineConfig, ErrorSink, PoolError, SharedTask, TaskResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::worker::{Worker, WorkerStatus};

const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Pool de tamaño fijo: N workers sobre una cola acotada compartida y un
/// único stream de resultados.
pub struct WorkerPool {
    worker_count: usize,
    capacity: usize,

    task_tx: Sender<SharedTask>,
    task_rx: Receiver<SharedTask>,
    result_tx: Sender<TaskResult>,
    result_rx: Receiver<TaskResult>,

    metrics: Arc<PoolMetrics>,
    errors: Option<Arc<dyn ErrorSink>>,
    cancel: CancellationToken,
    statuses: Vec<Arc<WorkerStatus>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    metrics_interval: Duration,

    started: AtomicBool,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// `workers` y `queue_size` se fuerzan a al menos 1.
    pub fn new(workers: usize, queue_size: usize, errors: Option<Arc<dyn ErrorSink>>) -> Self {
        let worker_count = workers.max(1);
        let capacity = queue_size.max(1);

        let (task_tx, task_rx) = async_channel::bounded(capacity);
        // sin límite: un worker nunca queda trabado esperando a que alguien lea
        let (result_tx, result_rx) = async_channel::unbounded();

        Self {
            worker_count,
            capacity,
            task_tx,
            task_rx,
            result_tx,
            result_rx,
            metrics: Arc::new(PoolMetrics::new()),
            errors,
            cancel: CancellationToken::new(),
            statuses: (0..worker_count)
                .map(|_| Arc::new(WorkerStatus::default()))
                .collect(),
            handles: Mutex::new(Vec::with_capacity(worker_count)),
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &EngineConfig, errors: Option<Arc<dyn ErrorSink>>) -> Self {
        let mut pool = Self::new(config.max_workers, config.queue_size, errors);
        if !config.metrics_interval.is_zero() {
            pool.metrics_interval = config.metrics_interval;
        }
        pool
    }

    /// Arranca los workers y el loop de métricas. No hace nada si el pool
    /// ya arrancó o ya se detuvo. Requiere un runtime tokio.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock();
        for (id, status) in self.statuses.iter().enumerate() {
            let worker = Worker::new(
                id,
                self.task_rx.clone(),
                self.result_tx.clone(),
                Arc::clone(&self.metrics),
                self.errors.clone(),
                Arc::clone(status),
            );
            handles.push(tokio::spawn(worker.start(self.cancel.clone())));
        }

        tokio::spawn(metrics_loop(
            Arc::clone(&self.metrics),
            self.statuses.clone(),
            self.metrics_interval,
            self.cancel.clone(),
        ));

        info!(
            "worker pool arrancado: {} workers, cola de {}",
            self.worker_count, self.capacity
        );
    }

    /// Intento de encolado sin bloqueo.
    pub fn submit(&self, task: SharedTask) -> Result<(), PoolError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(PoolError::Stopped);
        }

        let queued = self.metrics.reserve_slot();
        match self.task_tx.try_send(task) {
            Ok(()) => {
                self.metrics.record_submitted(queued);
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                self.metrics.release_slot();
                warn!(
                    "cola llena ({}), tarea {} rechazada",
                    self.capacity,
                    task.id()
                );
                Err(PoolError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.release_slot();
                Err(PoolError::Stopped)
            }
        }
    }

    /// Cierra la cola, espera a que se vacíe y cierra el stream de
    /// resultados. Si no alcanza `timeout`, cancela lo que quede y
    /// devuelve `StopTimeout`, pero el pool queda detenido igual.
    pub async fn stop(&self, timeout: Duration) -> Result<(), PoolError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.task_tx.close();

        if !self.started.load(Ordering::SeqCst) {
            let mut discarded = 0usize;
            while self.task_rx.try_recv().is_ok() {
                self.metrics.release_slot();
                discarded += 1;
            }
            if discarded > 0 {
                warn!(
                    "pool detenido sin arrancar: {} tareas encoladas descartadas",
                    discarded
                );
            }
            self.finish();
            return Ok(());
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        info!("deteniendo worker pool, esperando {} workers", handles.len());

        let drain = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("worker terminó con error: {}", e);
                }
            }
        };

        let outcome = match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!("worker pool detenido");
                Ok(())
            }
            Err(_) => {
                warn!("el pool no terminó en {:?}, cancelando trabajo pendiente", timeout);
                Err(PoolError::StopTimeout(timeout))
            }
        };

        self.finish();
        outcome
    }

    fn finish(&self) {
        self.cancel.cancel();
        self.metrics.refresh(0);
        self.result_tx.close();
    }

    /// Stream de resultados en orden de finalización. Cada receptor
    /// clonado compite por los mismos mensajes.
    ///
    /// No tiene límite, así `stop` drena la cola aunque nadie consuma.
    /// Quien envía muchas tareas sin leer acumula sus resultados en memoria.
    pub fn results(&self) -> Receiver<TaskResult> {
        self.result_rx.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Telemetría: promedio de duración y workers activos.
async fn metrics_loop(
    metrics: Arc<PoolMetrics>,
    statuses: Vec<Arc<WorkerStatus>>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let active = statuses.iter().filter(|s| s.is_active()).count();
                metrics.refresh(active);
            }
        }
    }
    debug!("loop de métricas terminado");
}
