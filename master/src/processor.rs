use chrono::{DateTime, Utc};
use common::{EngineConfig, ErrorSink, PoolError, SharedTask, TaskId, TaskResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worker::{MetricsSnapshot, WorkerPool};

use crate::error::ProcessError;
use crate::tasks::{ParseTask, SchemaParser};

const PARSE_PRIORITY: i32 = 1;

#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    files_processed: AtomicU64,
    error_count: AtomicU64,
    // suma de las duraciones de cada tarea, en nanosegundos
    processing_time_ns: AtomicU64,
}

impl ProcessorMetrics {
    fn record(&self, result: &TaskResult) {
        if !result.success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(result.duration.as_nanos()).unwrap_or(u64::MAX);
        self.processing_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn processing_time(&self) -> Duration {
        Duration::from_nanos(self.processing_time_ns.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub pool: MetricsSnapshot,
    pub files_processed: u64,
    pub error_count: u64,
    pub processing_time: Duration,
    pub started_at: Option<DateTime<Utc>>,
}

impl fmt::Display for ProcessorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Estadísticas del procesador:")?;
        writeln!(f, "  Archivos procesados: {}", self.files_processed)?;
        writeln!(
            f,
            "  Pool: {} workers activos, {} tareas completadas, {} fallidas",
            self.pool.active_workers, self.pool.tasks_completed, self.pool.tasks_failed
        )?;
        writeln!(f, "  Tiempo de procesamiento: {:?}", self.processing_time)?;
        write!(f, "  Errores: {}", self.error_count)
    }
}

/// Resumen de un lote procesado sin fallas.
#[derive(Debug, Clone)]
pub struct ProcessSummary {
    pub total: usize,
    pub duration: Duration,
    /// En orden de finalización.
    pub results: Vec<TaskResult>,
}

/// Fachada que procesa archivos completos sobre un `WorkerPool` simple
/// (sin grafo de dependencias).
pub struct ConcurrentProcessor {
    pool: WorkerPool,
    parser: Arc<dyn SchemaParser>,
    config: EngineConfig,
    metrics: ProcessorMetrics,
    started_at: Mutex<Option<DateTime<Utc>>>,
    // un lote a la vez: los lotes comparten el stream de resultados
    batch_lock: tokio::sync::Mutex<()>,
}

impl ConcurrentProcessor {
    pub fn new(
        config: EngineConfig,
        parser: Arc<dyn SchemaParser>,
        errors: Option<Arc<dyn ErrorSink>>,
    ) -> Self {
        Self {
            pool: WorkerPool::from_config(&config, errors),
            parser,
            config,
            metrics: ProcessorMetrics::default(),
            started_at: Mutex::new(None),
            batch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn start(&self) {
        self.pool.start();
        self.started_at.lock().get_or_insert_with(Utc::now);
    }

    pub async fn stop(&self) -> Result<(), PoolError> {
        self.pool.stop(self.config.stop_timeout).await
    }

    /// Una tarea de parseo por archivo. Espera todos los resultados del
    /// lote (o `processing_timeout`) y recién ahí informa las fallas.
    pub async fn process_files(&self, paths: &[PathBuf]) -> Result<ProcessSummary, ProcessError> {
        let started = Instant::now();
        if paths.is_empty() {
            return Ok(ProcessSummary {
                total: 0,
                duration: Duration::ZERO,
                results: Vec::new(),
            });
        }

        let _batch = self.batch_lock.lock().await;
        let deadline = started + self.config.processing_timeout;
        let batch = Uuid::new_v4();
        let mut pending: HashSet<TaskId> = HashSet::with_capacity(paths.len());

        info!("procesando {} archivos (lote {})", paths.len(), batch);

        for (i, path) in paths.iter().enumerate() {
            let id = format!("parse-{batch}-{i}");
            let task = ParseTask::new(id.clone(), path.clone(), Arc::clone(&self.parser))
                .with_priority(PARSE_PRIORITY)
                .with_timeout(self.config.task_timeout);
            debug!("lote {}: {} -> {}", batch, id, task.path().display());
            pending.insert(id);
            self.submit_with_retry(Arc::new(task), deadline).await?;
        }

        let rx = self.pool.results();
        let mut results = Vec::with_capacity(paths.len());
        while !pending.is_empty() {
            let received = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    warn!("lote {}: faltan {} resultados", batch, pending.len());
                    return Err(ProcessError::Timeout(self.config.processing_timeout));
                }
                Ok(Err(_)) => return Err(ProcessError::Submit(PoolError::Stopped)),
                Ok(Ok(result)) => result,
            };

            if !pending.remove(&received.task_id) {
                debug!("resultado ajeno al lote ignorado: {}", received.task_id);
                continue;
            }
            self.metrics.record(&received);
            results.push(received);
        }

        self.metrics
            .files_processed
            .fetch_add(paths.len() as u64, Ordering::Relaxed);

        let failed = results.iter().filter(|r| !r.success).count();
        let duration = started.elapsed();
        info!(
            "lote {} terminado en {:?}: {} ok, {} fallidos",
            batch,
            duration,
            results.len() - failed,
            failed
        );

        if failed > 0 {
            return Err(ProcessError::PartialFailure {
                failed,
                total: paths.len(),
            });
        }

        Ok(ProcessSummary {
            total: paths.len(),
            duration,
            results,
        })
    }

    async fn submit_with_retry(&self, task: SharedTask, deadline: Instant) -> Result<(), ProcessError> {
        loop {
            match self.pool.submit(Arc::clone(&task)) {
                Ok(()) => return Ok(()),
                Err(PoolError::QueueFull { .. }) => {
                    if Instant::now() >= deadline {
                        return Err(ProcessError::Timeout(self.config.processing_timeout));
                    }
                    tokio::time::sleep(self.config.submit_retry_interval).await;
                }
                Err(e) => return Err(ProcessError::Submit(e)),
            }
        }
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            pool: self.pool.metrics(),
            files_processed: self.metrics.files_processed(),
            error_count: self.metrics.error_count(),
            processing_time: self.metrics.processing_time(),
            started_at: *self.started_at.lock(),
        }
    }
}
