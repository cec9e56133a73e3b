use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

use crate::error::{ConfigError, SplitError};

pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 1024;

/// La cola acotada mide esto por cada worker.
const QUEUE_SLOTS_PER_WORKER: usize = 10;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Lee una env var numérica; si no está o no parsea, `None`.
fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    /// Bytes del final de un chunk que se repiten al inicio del siguiente.
    pub overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl SplitterConfig {
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.max_chunk_size == 0 {
            return Err(SplitError::InvalidConfig(
                "max_chunk_size tiene que ser mayor que 0".to_string(),
            ));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(SplitError::InvalidConfig(format!(
                "min_chunk_size ({}) supera max_chunk_size ({})",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        // sin esto el splitter no avanza
        if self.overlap >= self.min_chunk_size.max(1) {
            return Err(SplitError::InvalidConfig(format!(
                "overlap ({}) tiene que ser menor que min_chunk_size ({})",
                self.overlap, self.min_chunk_size
            )));
        }
        Ok(())
    }
}

/// Configuración del motor de ejecución.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub queue_size: usize,
    pub task_timeout: Duration,
    pub stop_timeout: Duration,
    /// Tope para que `process_files` junte todos sus resultados.
    pub processing_timeout: Duration,
    pub scheduler_interval: Duration,
    pub metrics_interval: Duration,
    /// Espera entre reintentos cuando la cola está llena.
    pub submit_retry_interval: Duration,
    pub splitter: SplitterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            max_workers: workers,
            queue_size: workers * QUEUE_SLOTS_PER_WORKER,
            task_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(5 * 60),
            scheduler_interval: Duration::from_millis(100),
            metrics_interval: Duration::from_secs(1),
            submit_retry_interval: Duration::from_millis(10),
            splitter: SplitterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults + overrides por entorno:
    /// XSD_MAX_WORKERS, XSD_QUEUE_SIZE, XSD_TASK_TIMEOUT_SECS,
    /// XSD_STOP_TIMEOUT_SECS, XSD_PROCESSING_TIMEOUT_SECS.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(workers) = env_number::<usize>("XSD_MAX_WORKERS") {
            config.max_workers = workers;
            // la cola sigue a los workers salvo que se fije aparte
            config.queue_size = workers * QUEUE_SLOTS_PER_WORKER;
        }
        if let Some(size) = env_number::<usize>("XSD_QUEUE_SIZE") {
            config.queue_size = size;
        }
        if let Some(secs) = env_number::<u64>("XSD_TASK_TIMEOUT_SECS") {
            config.task_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>("XSD_STOP_TIMEOUT_SECS") {
            config.stop_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>("XSD_PROCESSING_TIMEOUT_SECS") {
            config.processing_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.queue_size == 0 {
            return Err(ConfigError::EmptyQueue);
        }
        self.splitter.validate()?;
        Ok(())
    }

    pub fn with_workers(mut self, max_workers: usize, queue_size: usize) -> Self {
        self.max_workers = max_workers;
        self.queue_size = queue_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_son_validos() {
        let config = EngineConfig::default();
        assert!(config.max_workers > 0);
        assert_eq!(config.queue_size, config.max_workers * 10);
        assert_eq!(config.scheduler_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rechaza_pool_sin_workers_o_sin_cola() {
        let config = EngineConfig::default().with_workers(0, 4);
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));

        let config = EngineConfig::default().with_workers(2, 0);
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueue));
    }

    #[test]
    fn splitter_rechaza_overlap_mayor_o_igual_al_minimo() {
        let cfg = SplitterConfig {
            max_chunk_size: 100,
            min_chunk_size: 10,
            overlap: 10,
        };
        assert!(cfg.validate().is_err());

        let cfg = SplitterConfig {
            max_chunk_size: 10,
            min_chunk_size: 20,
            overlap: 1,
        };
        assert!(cfg.validate().is_err());

        assert!(SplitterConfig::default().validate().is_ok());
    }

    #[test]
    fn config_se_serializa_a_json() {
        let config = EngineConfig::default().with_workers(2, 8);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_workers, 2);
        assert_eq!(back.queue_size, 8);
        assert_eq!(back.splitter, config.splitter);
    }
}
