// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source code to embedding pipeline
//!
//! A generation runs normalize -> chunk -> encode -> mean-pool, then
//! attaches metadata describing what was embedded.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::embedding::chunker::{ChunkConfig, ChunkStrategy, ChunkingStrategy};
use crate::embedding::model::{ModelAccess, DEFAULT_CACHE_SIZE};
use crate::embedding::provider::{is_supported_model, EmbeddingBackend, ModelKey, DEFAULT_MODEL};
use crate::embedding::registry::ModelRegistry;
use crate::embedding::similarity::{self, mean_pool};
use crate::errors::{EmbedError, Result};
use crate::metadata::CodeMetadata;
use crate::parser::languages::Language;
use crate::preprocess::CodePreprocessor;

/// Default number of items per batch slice
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Generator settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub model_name: String,
    pub model_path: Option<PathBuf>,
    pub chunking: ChunkConfig,
    /// Strip comments and collapse whitespace before chunking
    pub preprocess: bool,
    pub extract_metadata: bool,
    pub batch_size: usize,
    /// Capacity of the per-instance embedding cache
    pub cache_size_limit: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            model_path: None,
            chunking: ChunkConfig::default(),
            preprocess: true,
            extract_metadata: true,
            batch_size: DEFAULT_BATCH_SIZE,
            cache_size_limit: DEFAULT_CACHE_SIZE,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_supported_model(&self.model_name) {
            return Err(EmbedError::UnsupportedModel(self.model_name.clone()));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::Config("batch_size must be greater than 0".to_string()));
        }
        self.chunking.validate()
    }
}

/// What a generation produced besides the vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub language: Language,
    pub chunk_count: usize,
    pub strategy: ChunkStrategy,
    pub model_name: String,
    pub embedding_dim: usize,
    #[serde(flatten)]
    pub code: Option<CodeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// File size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// An embedding with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub embedding: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

/// Turns source code into one embedding per input
pub struct CodeEmbeddingGenerator {
    config: GeneratorConfig,
    preprocessor: CodePreprocessor,
    chunker: ChunkingStrategy,
    model: ModelAccess,
}

impl CodeEmbeddingGenerator {
    /// Creates a generator whose model is shared through `registry`.
    ///
    /// Configuration errors (unknown model, bad chunk settings) surface here.
    /// The model itself is loaded on first use.
    pub fn new(
        config: GeneratorConfig,
        backend: Arc<dyn EmbeddingBackend>,
        registry: Arc<ModelRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = ChunkingStrategy::new(config.chunking.clone())?;
        let key = ModelKey::new(config.model_name.trim().to_lowercase(), config.model_path.clone());
        let model = ModelAccess::new(key, backend, registry, config.cache_size_limit);

        Ok(Self {
            config,
            preprocessor: CodePreprocessor::new(),
            chunker,
            model,
        })
    }

    /// Same as [`CodeEmbeddingGenerator::new`] with the process-wide registry.
    pub fn with_backend(config: GeneratorConfig, backend: Arc<dyn EmbeddingBackend>) -> Result<Self> {
        Self::new(config, backend, ModelRegistry::global())
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelAccess {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ModelAccess {
        &mut self.model
    }

    /// Embeds `code` written in the language named by `language`.
    pub fn generate_embedding(&mut self, code: &str, language: &str) -> Result<GenerationResult> {
        let language: Language = language.parse()?;
        self.generate_for(code, language)
    }

    /// Embeds `code` written in `language`.
    ///
    /// Blank or comment-only input fails with [`EmbedError::EmptyInput`].
    /// Failures other than bad input and model loading are reported as
    /// [`EmbedError::EmbeddingGeneration`].
    pub fn generate_for(&mut self, code: &str, language: Language) -> Result<GenerationResult> {
        self.run_pipeline(code, language).map_err(wrap_failure)
    }

    fn run_pipeline(&mut self, code: &str, language: Language) -> Result<GenerationResult> {
        if code.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let text = if self.config.preprocess {
            self.preprocessor.normalize(code, language)?
        } else {
            code.to_string()
        };
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let chunks = self.chunker.chunk(&text, language);
        let embedding = match chunks.as_slice() {
            [] => return Err(EmbedError::EmptyInput),
            [single] => self.model.encode(&single.text)?,
            many => {
                let texts: Vec<String> = many.iter().map(|chunk| chunk.text.clone()).collect();
                let vectors = self.model.encode_batch(&texts)?;
                mean_pool(&vectors)?
            }
        };
        tracing::debug!(
            %language,
            chunks = chunks.len(),
            dimension = embedding.len(),
            "generated embedding"
        );

        let code_metadata = self.config.extract_metadata.then(|| {
            let definitions = self.preprocessor.extract_definitions(&text, language);
            let mut meta = CodeMetadata::extract(&text, language, &definitions);
            meta.line_count = code.lines().count();
            meta
        });

        Ok(GenerationResult {
            metadata: EmbeddingMetadata {
                language,
                chunk_count: chunks.len(),
                strategy: self.config.chunking.strategy,
                model_name: self.model.key().model_name.clone(),
                embedding_dim: embedding.len(),
                code: code_metadata,
                file_path: None,
                file_size: None,
            },
            embedding,
        })
    }

    /// Embeds `(code, language)` pairs in order, `batch_size` at a time.
    ///
    /// Stops at the first failure.
    pub fn generate_embeddings_batch<C, L>(&mut self, items: &[(C, L)]) -> Result<Vec<GenerationResult>>
    where
        C: AsRef<str>,
        L: AsRef<str>,
    {
        let mut results = Vec::with_capacity(items.len());
        let batch_count = items.len().div_ceil(self.config.batch_size);

        for (batch_idx, batch) in items.chunks(self.config.batch_size).enumerate() {
            tracing::debug!(batch = batch_idx + 1, of = batch_count, size = batch.len(), "embedding batch");
            for (code, language) in batch {
                results.push(self.generate_embedding(code.as_ref(), language.as_ref())?);
            }
        }
        Ok(results)
    }

    /// Reads a file, infers its language from the extension and embeds it.
    pub fn generate_embedding_from_file(&mut self, path: impl AsRef<Path>) -> Result<GenerationResult> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmbedError::FileNotFound(path.to_path_buf()));
        }
        let language = Language::from_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{ext}"))
                .unwrap_or_else(|| path.display().to_string());
            EmbedError::UnsupportedLanguage(ext)
        })?;

        let code = fs::read_to_string(path)?;
        let file_size = fs::metadata(path)?.len();

        let mut result = self.generate_for(&code, language)?;
        result.metadata.file_path = Some(path.to_path_buf());
        result.metadata.file_size = Some(file_size);
        Ok(result)
    }

    /// See [`similarity::calculate_similarity`].
    pub fn calculate_similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        similarity::calculate_similarity(a, b)
    }
}

/// Input and model-loading errors keep their identity; everything else is
/// reported as a generation failure.
fn wrap_failure(err: EmbedError) -> EmbedError {
    match err {
        EmbedError::EmptyInput
        | EmbedError::UnsupportedLanguage(_)
        | EmbedError::ModelLoad { .. }
        | EmbedError::EmbeddingGeneration { .. } => err,
        other => EmbedError::generation(other),
    }
}
