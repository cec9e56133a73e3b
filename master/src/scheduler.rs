use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use worker::WorkerPool;

use crate::queue::PriorityQueue;

/// Pasa a lo sumo una tarea de la cola de prioridad al pool.
///
/// Si el pool la rechaza vuelve a la cola para otro intento. `in_flight`
/// cuenta las tareas entregadas al pool que todavía no produjeron
/// resultado (lo decrementa quien consume los resultados).
pub(crate) fn dispatch_one(
    queue: &PriorityQueue,
    pool: &WorkerPool,
    in_flight: &AtomicUsize,
) -> bool {
    let Some(task) = queue.pop() else {
        return false;
    };

    // antes del submit: el resultado puede llegar antes de que volvamos
    in_flight.fetch_add(1, Ordering::SeqCst);
    match pool.submit(task.clone()) {
        Ok(()) => {
            debug!("tarea {} entregada al pool (prioridad {})", task.id(), task.priority());
            true
        }
        Err(e) => {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            debug!("no se pudo entregar {}: {}, vuelve a la cola", task.id(), e);
            queue.push(task);
            false
        }
    }
}

/// Loop periódico que alimenta el `WorkerPool` desde la `PriorityQueue`.
pub struct TaskScheduler {
    queue: Arc<PriorityQueue>,
    pool: Arc<WorkerPool>,
    in_flight: Arc<AtomicUsize>,
    interval: Duration,
    cancel: CancellationToken,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        queue: Arc<PriorityQueue>,
        pool: Arc<WorkerPool>,
        in_flight: Arc<AtomicUsize>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            pool,
            in_flight,
            interval: interval.max(Duration::from_millis(1)),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.cancel.is_cancelled() || self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let queue = Arc::clone(&self.queue);
        let pool = Arc::clone(&self.pool);
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = self.cancel.clone();
        let every = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        dispatch_one(&queue, &pool, &in_flight);
                    }
                }
            }
            debug!("scheduler terminado");
        });

        *self.handle.lock() = Some(handle);
        info!("scheduler arrancado (tick cada {:?})", every);
    }

    /// Detiene el loop y espera a que salga: después de esto no se
    /// entregan más tareas al pool.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Task, TaskContext, TaskOutput};

    struct Quick(String, i32);

    #[async_trait]
    impl Task for Quick {
        async fn execute(&self, _ctx: TaskContext) -> anyhow::Result<TaskOutput> {
            Ok(None)
        }

        fn id(&self) -> &str {
            &self.0
        }

        fn priority(&self) -> i32 {
            self.1
        }
    }

    #[tokio::test]
    async fn rechazo_del_pool_devuelve_la_tarea_a_la_cola() {
        let queue = PriorityQueue::new();
        let pool = WorkerPool::new(1, 1, None);
        let in_flight = AtomicUsize::new(0);

        queue.push(Arc::new(Quick("a".into(), 1)));
        queue.push(Arc::new(Quick("b".into(), 2)));

        // sin arrancar el pool: entra una, la segunda rebota
        assert!(dispatch_one(&queue, &pool, &in_flight));
        assert!(!dispatch_one(&queue, &pool, &in_flight));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|t| t.id().to_string()).as_deref(), Some("a"));
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);
        assert!(!dispatch_one(&queue, &pool, &in_flight));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn el_loop_entrega_en_orden_de_prioridad() {
        let queue = Arc::new(PriorityQueue::new());
        let pool = Arc::new(WorkerPool::new(1, 16, None));
        let in_flight = Arc::new(AtomicUsize::new(0));

        for (id, prio) in [("baja", 1), ("alta", 9), ("media", 5)] {
            queue.push(Arc::new(Quick(id.into(), prio)));
        }

        let scheduler = TaskScheduler::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            in_flight,
            Duration::from_millis(5),
        );
        scheduler.start();
        assert!(scheduler.is_running());

        let rx = pool.results();
        pool.start();

        let mut order = Vec::new();
        for _ in 0..3 {
            let r = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            order.push(r.task_id);
        }
        assert_eq!(order, vec!["alta", "media", "baja"]);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        pool.stop(Duration::from_secs(1)).await.unwrap();
    }
}
