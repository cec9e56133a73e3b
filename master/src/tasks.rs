use async_trait::async_trait;
use common::{Chunk, Task, TaskContext, TaskId, TaskKind, TaskOutput};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/* --------- Colaboradores --------- */

/// Parser de un archivo de esquema completo.
#[async_trait]
pub trait SchemaParser: Send + Sync {
    async fn parse(&self, path: &Path) -> anyhow::Result<TaskOutput>;
}

/// Generador de código para un tipo del esquema.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, type_name: &str, schema: &serde_json::Value)
        -> anyhow::Result<TaskOutput>;
}

/// Procesamiento sincrónico de un chunk (corre en el pool blocking de tokio).
pub type ChunkFn = Arc<dyn Fn(&Chunk) -> anyhow::Result<()> + Send + Sync>;

/// Corre `work` salvo que el contexto se cancele antes (pool o deadline).
async fn cancellable<F>(ctx: &TaskContext, id: &str, work: F) -> anyhow::Result<TaskOutput>
where
    F: std::future::Future<Output = anyhow::Result<TaskOutput>>,
{
    if ctx.is_cancelled() {
        anyhow::bail!("tarea {id} cancelada antes de empezar");
    }
    tokio::select! {
        out = work => out,
        _ = ctx.cancelled() => anyhow::bail!("tarea {id} cancelada"),
    }
}

/* --------- ParseTask --------- */

pub struct ParseTask {
    id: TaskId,
    path: PathBuf,
    priority: i32,
    timeout: Option<Duration>,
    parser: Arc<dyn SchemaParser>,
}

impl ParseTask {
    pub fn new(id: impl Into<TaskId>, path: impl Into<PathBuf>, parser: Arc<dyn SchemaParser>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            priority: 0,
            timeout: None,
            parser,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Task for ParseTask {
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<TaskOutput> {
        cancellable(&ctx, &self.id, self.parser.parse(&self.path)).await
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Parse
    }
}

impl fmt::Debug for ParseTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseTask")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("priority", &self.priority)
            .finish()
    }
}

/* --------- ChunkTask --------- */

pub struct ChunkTask {
    id: TaskId,
    chunk: Arc<Chunk>,
    process: ChunkFn,
    timeout: Option<Duration>,
}

impl ChunkTask {
    /// El ID de la tarea es el ID del chunk, así las dependencias entre
    /// chunks valen directo como dependencias entre tareas.
    pub fn new(chunk: Chunk, process: ChunkFn) -> Self {
        Self {
            id: chunk.id.clone(),
            chunk: Arc::new(chunk),
            process,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.chunk.dependencies
    }
}

#[async_trait]
impl Task for ChunkTask {
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<TaskOutput> {
        let chunk = Arc::clone(&self.chunk);
        let process = Arc::clone(&self.process);

        let work = async move {
            let handle = tokio::task::spawn_blocking(move || {
                process(&chunk)?;
                Ok::<TaskOutput, anyhow::Error>(Some(serde_json::json!({
                    "bytes": chunk.len(),
                    "start": chunk.start_offset,
                    "end": chunk.end_offset,
                })))
            });
            match handle.await {
                Ok(out) => out,
                // el worker lo clasifica como panic, no como error
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(e.into()),
            }
        };
        cancellable(&ctx, &self.id, work).await
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.chunk.priority
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Chunk
    }

    fn chunk_id(&self) -> Option<&str> {
        Some(&self.chunk.id)
    }
}

/* --------- CodeGenTask --------- */

pub struct CodeGenTask {
    id: TaskId,
    type_name: String,
    schema: serde_json::Value,
    priority: i32,
    timeout: Option<Duration>,
    generator: Arc<dyn CodeGenerator>,
}

impl CodeGenTask {
    pub fn new(
        id: impl Into<TaskId>,
        type_name: impl Into<String>,
        schema: serde_json::Value,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            schema,
            priority: 0,
            timeout: None,
            generator,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

#[async_trait]
impl Task for CodeGenTask {
    async fn execute(&self, ctx: TaskContext) -> anyhow::Result<TaskOutput> {
        let work = self.generator.generate(&self.type_name, &self.schema);
        cancellable(&ctx, &self.id, work).await
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn kind(&self) -> TaskKind {
        TaskKind::CodeGen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct EchoParser;

    #[async_trait]
    impl SchemaParser for EchoParser {
        async fn parse(&self, path: &Path) -> anyhow::Result<TaskOutput> {
            Ok(Some(serde_json::json!({ "path": path.display().to_string() })))
        }
    }

    struct StuckGenerator;

    #[async_trait]
    impl CodeGenerator for StuckGenerator {
        async fn generate(
            &self,
            _type_name: &str,
            _schema: &serde_json::Value,
        ) -> anyhow::Result<TaskOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    fn chunk(id: &str, priority: i32, deps: &[&str]) -> Chunk {
        Chunk {
            id: id.to_string(),
            data: b"<xs:element name=\"a\"/>".to_vec(),
            start_offset: 0,
            end_offset: 22,
            priority,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn parse_task_delega_en_el_parser() {
        let task = ParseTask::new("p1", "a.xsd", Arc::new(EchoParser))
            .with_priority(1)
            .with_timeout(Duration::from_secs(1));

        assert_eq!(task.kind(), TaskKind::Parse);
        assert_eq!(task.path(), Path::new("a.xsd"));
        assert_eq!(task.priority(), 1);
        assert_eq!(task.timeout(), Some(Duration::from_secs(1)));

        let out = task.execute(TaskContext::detached()).await.unwrap();
        assert_eq!(out, Some(serde_json::json!({ "path": "a.xsd" })));
    }

    #[tokio::test]
    async fn chunk_task_hereda_id_y_prioridad_del_chunk() {
        let process: ChunkFn = Arc::new(|c: &Chunk| {
            anyhow::ensure!(!c.is_empty(), "chunk vacío");
            Ok(())
        });
        let task = ChunkTask::new(chunk("chunk-0-ab", 5, &["chunk-1-cd"]), process);

        assert_eq!(task.id(), "chunk-0-ab");
        assert_eq!(task.chunk_id(), Some("chunk-0-ab"));
        assert_eq!(task.priority(), 5);
        assert_eq!(task.dependencies(), &["chunk-1-cd".to_string()]);
        assert_eq!(task.kind(), TaskKind::Chunk);

        let out = task.execute(TaskContext::detached()).await.unwrap().unwrap();
        assert_eq!(out["bytes"], 22);
    }

    #[tokio::test]
    async fn chunk_task_propaga_el_error_del_closure() {
        let process: ChunkFn = Arc::new(|_c: &Chunk| -> anyhow::Result<()> {
            anyhow::bail!("no se pudo procesar")
        });
        let task = ChunkTask::new(chunk("c", 1, &[]), process);

        let err = task.execute(TaskContext::detached()).await.unwrap_err();
        assert!(err.to_string().contains("no se pudo procesar"));
    }

    #[tokio::test]
    async fn panic_del_closure_sale_como_panic() {
        let process: ChunkFn = Arc::new(|_c: &Chunk| -> anyhow::Result<()> {
            panic!("chunk corrupto")
        });
        let task = ChunkTask::new(chunk("c", 1, &[]), process);

        let joined = tokio::spawn(async move { task.execute(TaskContext::detached()).await }).await;
        let err = joined.unwrap_err();
        assert!(err.is_panic());
    }

    #[tokio::test]
    async fn codegen_respeta_la_cancelacion() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(0, token.child_token(), None);
        let task = CodeGenTask::new("g1", "Persona", serde_json::json!({}), Arc::new(StuckGenerator));
        assert_eq!(task.type_name(), "Persona");

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(2), task.execute(ctx))
            .await
            .expect("la cancelación corta la espera")
            .unwrap_err();
        assert!(err.to_string().contains("cancelada"));
    }

    #[tokio::test]
    async fn contexto_ya_cancelado_no_ejecuta() {
        let token = CancellationToken::new();
        token.cancel();
        let task = ParseTask::new("p2", "b.xsd", Arc::new(EchoParser));

        let ctx = TaskContext::new(0, token, None);
        assert!(task.execute(ctx).await.is_err());
    }
}
