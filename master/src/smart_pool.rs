use async_channel::{Receiver, Sender};
use common::{
    Chunk, ChunkId, DependencyGraph, EngineConfig, ErrorSink, PoolError, Registration,
    SharedTask, TaskId, TaskResult, XsdSplitter,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use worker::{MetricsSnapshot, WorkerPool};

use crate::error::ProcessError;
use crate::queue::PriorityQueue;
use crate::scheduler::{dispatch_one, TaskScheduler};
use crate::tasks::{ChunkFn, ChunkTask};

const FLUSH_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Serialize)]
pub struct SmartPoolMetrics {
    pub pool: MetricsSnapshot,
    /// Listas en la cola de prioridad, todavía no entregadas al pool.
    pub pending_tasks: usize,
    /// Dependencias que tienen tareas bloqueadas.
    pub waiting_tasks: usize,
    pub completed_tasks: usize,
    pub dependency_count: usize,
}

/// Pool con dependencias: una tarea recién llega a la cola de prioridad
/// cuando todas sus dependencias produjeron un resultado.
pub struct SmartWorkerPool {
    pool: Arc<WorkerPool>,
    queue: Arc<PriorityQueue>,
    graph: Arc<RwLock<DependencyGraph>>,
    scheduler: TaskScheduler,
    in_flight: Arc<AtomicUsize>,

    // resultados reenviados después de actualizar el grafo
    forward_tx: Sender<TaskResult>,
    forward_rx: Receiver<TaskResult>,

    splitter: XsdSplitter,
    task_timeout: Duration,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl SmartWorkerPool {
    pub fn new(config: &EngineConfig, errors: Option<Arc<dyn ErrorSink>>) -> Self {
        let pool = Arc::new(WorkerPool::from_config(config, errors));
        let queue = Arc::new(PriorityQueue::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let scheduler = TaskScheduler::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&in_flight),
            config.scheduler_interval,
        );
        let (forward_tx, forward_rx) = async_channel::unbounded();

        Self {
            pool,
            queue,
            graph: Arc::new(RwLock::new(DependencyGraph::new())),
            scheduler,
            in_flight,
            forward_tx,
            forward_rx,
            splitter: XsdSplitter::new(config.splitter),
            task_timeout: config.task_timeout,
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Reemplaza el splitter (por ejemplo, con otro extractor de dependencias).
    pub fn with_splitter(mut self, splitter: XsdSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Arranca el pool, el scheduler y el loop de resultados.
    pub fn start(&self) {
        if self.stopping.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pool.start();
        self.scheduler.start();

        tokio::spawn(handle_results(
            self.pool.results(),
            Arc::clone(&self.graph),
            Arc::clone(&self.queue),
            Arc::clone(&self.in_flight),
            self.forward_tx.clone(),
        ));

        info!("smart worker pool arrancado");
    }

    pub fn submit(&self, task: SharedTask) -> Result<(), PoolError> {
        self.submit_with_dependencies(task, &[])
    }

    /// Registra la tarea en el grafo. Si no tiene dependencias pendientes
    /// va directo a la cola de prioridad; si no, queda esperando.
    pub fn submit_with_dependencies(
        &self,
        task: SharedTask,
        dependencies: &[TaskId],
    ) -> Result<(), PoolError> {
        if self.stopping.load(Ordering::SeqCst) || self.pool.is_stopped() {
            return Err(PoolError::Stopped);
        }

        let registration = self.graph.write().register(task, dependencies);
        match registration {
            Registration::Ready(task) => {
                debug!("tarea {} lista", task.id());
                self.queue.push(task);
            }
            Registration::Waiting(pending) => {
                debug!("tarea esperando a {:?}", pending);
            }
        }
        Ok(())
    }

    /// Divide `data`, arma un `ChunkTask` por chunk y los envía con sus
    /// dependencias. Devuelve los IDs en orden de documento.
    pub fn process_chunks<F>(&self, data: &[u8], process_fn: F) -> Result<Vec<ChunkId>, ProcessError>
    where
        F: Fn(&Chunk) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let chunks = self.splitter.split(data)?;
        let process: ChunkFn = Arc::new(process_fn);

        info!(
            "{} bytes divididos en {} chunks (max {})",
            data.len(),
            chunks.len(),
            self.splitter.config().max_chunk_size
        );

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = chunk.id.clone();
            let deps = chunk.dependencies.clone();
            let task = ChunkTask::new(chunk, Arc::clone(&process)).with_timeout(self.task_timeout);
            self.submit_with_dependencies(Arc::new(task), &deps)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Stream de resultados, cada uno después de actualizar el grafo.
    ///
    /// El canal no tiene límite: el loop de resultados nunca se bloquea
    /// esperando a un consumidor, así las dependencias se siguen liberando
    /// y `stop` termina aunque nadie lea. Lo que no se lee queda en memoria
    /// hasta que se suelta el pool.
    pub fn results(&self) -> Receiver<TaskResult> {
        self.forward_rx.clone()
    }

    pub fn metrics(&self) -> SmartPoolMetrics {
        let graph = self.graph.read();
        SmartPoolMetrics {
            pool: self.pool.metrics(),
            pending_tasks: self.queue.len(),
            waiting_tasks: graph.waiting_count(),
            completed_tasks: graph.completed_count(),
            dependency_count: graph.dependency_count(),
        }
    }

    /// Deja de aceptar tareas, termina de entregar las que ya están listas
    /// (y las que se liberen mientras tanto), frena el scheduler y después
    /// detiene el pool. Las tareas con dependencias que nunca terminan se
    /// abandonan.
    pub async fn stop(&self, timeout: Duration) -> Result<(), PoolError> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let started = self.started.load(Ordering::SeqCst);
        if !started {
            // sin loop de resultados nadie más cierra el stream
            let dropped = self.queue.len();
            if dropped > 0 {
                warn!("pool nunca arrancado: se descartan {} tareas listas", dropped);
            }
            self.forward_tx.close();
        }
        let flushed = !started || self.flush(deadline).await;

        self.scheduler.stop().await;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let stopped = self.pool.stop(remaining).await;

        let waiting = self.graph.read().waiting_count();
        if waiting > 0 {
            warn!("{} dependencias nunca terminaron, sus tareas se descartan", waiting);
        }

        if !flushed {
            warn!(
                "quedaron {} tareas listas sin entregar al detener",
                self.queue.len()
            );
            return Err(PoolError::StopTimeout(timeout));
        }
        stopped.map_err(|_| PoolError::StopTimeout(timeout))
    }

    async fn flush(&self, deadline: Instant) -> bool {
        loop {
            if self.queue.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if !dispatch_one(&self.queue, &self.pool, &self.in_flight) {
                tokio::time::sleep(FLUSH_POLL).await;
            }
        }
    }
}

/// Consume los resultados del pool base: completa en el grafo, pasa a la
/// cola las tareas liberadas y recién ahí reenvía el resultado.
async fn handle_results(
    results: Receiver<TaskResult>,
    graph: Arc<RwLock<DependencyGraph>>,
    queue: Arc<PriorityQueue>,
    in_flight: Arc<AtomicUsize>,
    forward: Sender<TaskResult>,
) {
    while let Ok(result) = results.recv().await {
        let released = graph.write().complete(&result.task_id);
        for task in released {
            debug!("tarea {} liberada por {}", task.id(), result.task_id);
            queue.push(task);
        }
        in_flight.fetch_sub(1, Ordering::SeqCst);

        if forward.send(result).await.is_err() {
            break;
        }
    }
    forward.close();
    debug!("loop de resultados terminado");
}
