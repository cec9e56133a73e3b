use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Contadores del pool. Todo atómico, sin locks.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_timeout: AtomicU64,
    total_duration_ns: AtomicU64,
    average_duration_ns: AtomicU64,
    active_workers: AtomicU64,
    // aceptadas y todavía sin terminar
    queue_size: AtomicI64,
    peak_queue_size: AtomicI64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserva un lugar en el gauge antes de intentar encolar.
    pub(crate) fn reserve_slot(&self) -> i64 {
        self.queue_size.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release_slot(&self) {
        self.queue_size.fetch_sub(1, Ordering::SeqCst);
    }

    /// Envío aceptado: cuenta la tarea y actualiza el pico.
    pub(crate) fn record_submitted(&self, queue_size: i64) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.peak_queue_size.fetch_max(queue_size, Ordering::SeqCst);
    }

    pub(crate) fn record_success(&self, duration: Duration) {
        self.add_duration(duration);
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, duration: Duration, timed_out: bool) {
        self.add_duration(duration);
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.tasks_timeout.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn add_duration(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_duration_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Recalcula el promedio y guarda los workers activos observados.
    pub(crate) fn refresh(&self, active_workers: usize) {
        let executed = self.tasks_completed.load(Ordering::Relaxed)
            + self.tasks_failed.load(Ordering::Relaxed);
        if executed > 0 {
            let avg = self.total_duration_ns.load(Ordering::Relaxed) / executed;
            self.average_duration_ns.store(avg, Ordering::Relaxed);
        }
        self.active_workers
            .store(active_workers as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_timeout: self.tasks_timeout.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.total_duration_ns.load(Ordering::Relaxed)),
            average_duration: Duration::from_nanos(
                self.average_duration_ns.load(Ordering::Relaxed),
            ),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::SeqCst).max(0) as u64,
            peak_queue_size: self.peak_queue_size.load(Ordering::SeqCst).max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timeout: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub active_workers: u64,
    pub queue_size: u64,
    pub peak_queue_size: u64,
}
