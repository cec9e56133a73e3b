use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{chunk_priority, EngineConfig, ErrorManager, ErrorSink, TaskOutput, XsdSplitter};
use glob::glob;
use master::{ConcurrentProcessor, ProcessError, SchemaParser};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Lee el archivo y lo divide en chunks; devuelve cuántos y de qué prioridad.
struct ChunkingParser {
    splitter: XsdSplitter,
}

#[async_trait]
impl SchemaParser for ChunkingParser {
    async fn parse(&self, path: &Path) -> Result<TaskOutput> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("no se pudo leer {}", path.display()))?;
        let chunks = self.splitter.split(&data)?;

        Ok(Some(serde_json::json!({
            "bytes": data.len(),
            "chunks": chunks.len(),
            "priority": chunk_priority(&data),
        })))
    }
}

/// Expande los patrones de la línea de comandos a archivos existentes.
fn expand_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        match glob(pattern) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if entry.is_file() {
                        files.push(entry);
                    }
                }
            }
            Err(e) => warn!("patrón inválido {}: {}", pattern, e),
        }
    }
    files
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("master=debug,worker=info,common=info")
        .init();

    let config = EngineConfig::from_env().context("configuración inválida")?;
    info!(
        "config: {} workers, cola de {}, timeout por tarea {:?}",
        config.max_workers, config.queue_size, config.task_timeout
    );

    let patterns: Vec<String> = std::env::args().skip(1).collect();
    if patterns.is_empty() {
        warn!("uso: master <patrón.xsd>...");
        return Ok(());
    }

    let files = expand_inputs(&patterns);
    if files.is_empty() {
        warn!("ningún archivo coincide con {:?}", patterns);
        return Ok(());
    }

    let errors = Arc::new(ErrorManager::default());
    let parser = Arc::new(ChunkingParser {
        splitter: XsdSplitter::new(config.splitter),
    });
    let processor = ConcurrentProcessor::new(
        config,
        parser,
        Some(errors.clone() as Arc<dyn ErrorSink>),
    );
    processor.start();

    match processor.process_files(&files).await {
        Ok(summary) => {
            info!(
                "{} archivos procesados en {:?}",
                summary.total, summary.duration
            );
            for result in &summary.results {
                if let Some(data) = &result.data {
                    info!("{}: {}", result.task_id, data);
                }
            }
        }
        Err(ProcessError::PartialFailure { failed, total }) => {
            error!("fallaron {} de {} archivos", failed, total);
            for report in errors.errors() {
                error!("{}", report);
            }
        }
        Err(e) => error!("procesamiento abortado: {}", e),
    }

    if let Err(e) = processor.stop().await {
        warn!("stop: {}", e);
    }
    info!("{}", processor.stats());

    let summary = errors.summary();
    if summary.total_errors > 0 {
        info!("errores por tipo: {:?}", summary.errors_by_kind);
    }
    Ok(())
}
