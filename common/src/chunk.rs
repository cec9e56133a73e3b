use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::debug;

use crate::config::SplitterConfig;
use crate::error::SplitError;

pub type ChunkId = String;

/// Pedazo contiguo de un documento XSD, cortado en un límite de tag seguro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub data: Vec<u8>,
    /// Rango `[start_offset, end_offset)` dentro del documento original.
    pub start_offset: usize,
    pub end_offset: usize,
    pub priority: i32,
    /// IDs de otros chunks que tienen que procesarse antes.
    pub dependencies: Vec<ChunkId>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Prioridades por tipo de construcción, de mayor a menor importancia.
const PRIORITY_MARKERS: [(&[&str], i32); 5] = [
    (&["<xs:schema", "<xsd:schema"], 10),
    (&["<xs:complexType", "<xsd:complexType"], 8),
    (&["<xs:simpleType", "<xsd:simpleType"], 6),
    (&["<xs:element", "<xsd:element"], 5),
    (&["<xs:attribute", "<xsd:attribute"], 3),
];
const DEFAULT_PRIORITY: i32 = 1;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Prioridad de un chunk según la construcción más importante que contiene.
pub fn chunk_priority(data: &[u8]) -> i32 {
    PRIORITY_MARKERS
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| contains(data, m.as_bytes())))
        .map(|(_, priority)| *priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

fn chunk_id(data: &[u8], index: usize) -> ChunkId {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("chunk-{}-{:x}", index, hasher.finish())
}

/// Extrae nombres de tipos definidos y referenciados dentro de un chunk.
/// Es lo que alimenta `Chunk::dependencies`.
pub trait DependencyExtractor: Send + Sync {
    fn type_names(&self, content: &str) -> Vec<String>;
    fn type_references(&self, content: &str) -> Vec<String>;
}

/// Extractor por defecto: no reconoce nada, así que ningún chunk declara
/// dependencias y todos quedan listos de inmediato.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl DependencyExtractor for NoDependencies {
    fn type_names(&self, _content: &str) -> Vec<String> {
        Vec::new()
    }

    fn type_references(&self, _content: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Divide documentos XSD grandes en chunks procesables en paralelo.
#[derive(Clone)]
pub struct XsdSplitter {
    config: SplitterConfig,
    extractor: Arc<dyn DependencyExtractor>,
}

impl XsdSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            extractor: Arc::new(NoDependencies),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DependencyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    pub fn split(&self, data: &[u8]) -> Result<Vec<Chunk>, SplitError> {
        self.config.validate()?;

        let len = data.len();
        if len <= self.config.min_chunk_size {
            // muy chico, va entero
            return Ok(vec![self.make_chunk(data, 0, 0, len)]);
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let tentative_end = (start + self.config.max_chunk_size).min(len);
            let end = self.find_split_point(data, start, tentative_end);

            chunks.push(self.make_chunk(data, chunks.len(), start, end));

            if end >= len {
                break;
            }
            // end - start > min_chunk_size > overlap, así que siempre avanza
            start = end - self.config.overlap;
        }

        self.analyze_dependencies(&mut chunks);

        debug!(
            "documento de {} bytes dividido en {} chunks (max={} min={} overlap={})",
            len,
            chunks.len(),
            self.config.max_chunk_size,
            self.config.min_chunk_size,
            self.config.overlap
        );

        Ok(chunks)
    }

    /// Busca hacia atrás desde `tentative_end` un `>` seguido de espacio o `<`,
    /// sin bajar de `start + min_chunk_size`. Si no hay, corta en `tentative_end`.
    fn find_split_point(&self, data: &[u8], start: usize, tentative_end: usize) -> usize {
        if tentative_end >= data.len() {
            return data.len();
        }

        let lower = start + self.config.min_chunk_size;
        for i in (lower..tentative_end).rev() {
            if data[i] == b'>' {
                let next = data[i + 1];
                if next.is_ascii_whitespace() || next == b'<' {
                    return i + 1;
                }
            }
        }

        tentative_end
    }

    fn make_chunk(&self, data: &[u8], index: usize, start: usize, end: usize) -> Chunk {
        let bytes = data[start..end].to_vec();
        Chunk {
            id: chunk_id(&bytes, index),
            priority: chunk_priority(&bytes),
            data: bytes,
            start_offset: start,
            end_offset: end,
            dependencies: Vec::new(),
        }
    }

    /// Índice tipo -> chunk que lo define, y después referencias de cada
    /// chunk contra ese índice. Se ignoran autorreferencias y repetidos.
    pub fn analyze_dependencies(&self, chunks: &mut [Chunk]) {
        let mut type_to_chunk: HashMap<String, ChunkId> = HashMap::new();

        for chunk in chunks.iter() {
            let content = String::from_utf8_lossy(&chunk.data);
            for name in self.extractor.type_names(&content) {
                type_to_chunk.insert(name, chunk.id.clone());
            }
        }

        if type_to_chunk.is_empty() {
            return;
        }

        for chunk in chunks.iter_mut() {
            let content = String::from_utf8_lossy(&chunk.data);
            let mut deps: Vec<ChunkId> = Vec::new();

            for reference in self.extractor.type_references(&content) {
                if let Some(dep) = type_to_chunk.get(&reference) {
                    if *dep != chunk.id && !deps.contains(dep) {
                        deps.push(dep.clone());
                    }
                }
            }

            chunk.dependencies = deps;
        }
    }
}

impl Default for XsdSplitter {
    fn default() -> Self {
        Self::new(SplitterConfig::default())
    }
}

impl std::fmt::Debug for XsdSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XsdSplitter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
