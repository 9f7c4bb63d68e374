// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for dupembed
//!
//! Loads configuration from .dupembedrc.toml in current directory or ~/.config/dupembed/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::embedding::chunker::{ChunkConfig, ChunkStrategy, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedding::model::DEFAULT_CACHE_SIZE;
use crate::embedding::provider::{
    CommandBackend, EmbeddingBackend, FastEmbedBackend, HashingBackend, DEFAULT_MODEL,
};
use crate::errors::{EmbedError, Result};
use crate::generator::{GeneratorConfig, DEFAULT_BATCH_SIZE};

/// Environment variable overriding `[model] name`
pub const MODEL_ENV: &str = "DUPEMBED_MODEL";
/// Environment variable overriding `[generator] batch_size`
pub const BATCH_SIZE_ENV: &str = "DUPEMBED_BATCH_SIZE";
/// Environment variable overriding `[cache] size`
pub const CACHE_SIZE_ENV: &str = "DUPEMBED_CACHE_SIZE";

/// Embedding backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Fastembed,
    Command,
    Hashing,
}

/// Model configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Backend type (fastembed, command, hashing)
    pub backend: Option<BackendType>,
    /// Model name, one of the supported models
    pub name: Option<String>,
    /// Directory holding model files
    pub path: Option<PathBuf>,
    /// Command to execute for the command backend
    pub command: Option<String>,
    /// Vector length for the hashing backend
    pub dimension: Option<usize>,
}

impl ModelConfig {
    /// Get backend type (defaults to Fastembed)
    pub fn backend(&self) -> BackendType {
        self.backend.unwrap_or_default()
    }

    /// Get model name (defaults to all-minilm-l6-v2)
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get hashing dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension.unwrap_or(384)
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Strategy name (fixed_size, function_based, semantic)
    pub strategy: Option<String>,
    /// Window width in characters
    pub chunk_size: Option<usize>,
    /// Characters shared by consecutive windows
    pub overlap: Option<usize>,
    /// Upper bound for semantic chunks
    pub max_chunk_size: Option<usize>,
}

impl ChunkingConfig {
    /// Get strategy (defaults to function_based)
    pub fn strategy(&self) -> Result<ChunkStrategy> {
        match &self.strategy {
            Some(name) => name.parse(),
            None => Ok(ChunkStrategy::default()),
        }
    }

    /// Get chunk size (defaults to 512)
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Get overlap (defaults to 50)
    pub fn overlap(&self) -> usize {
        self.overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP)
    }

    /// Build a validated chunk configuration
    pub fn to_chunk_config(&self) -> Result<ChunkConfig> {
        let config = ChunkConfig::new(self.strategy()?, self.chunk_size(), self.overlap())?;
        Ok(match self.max_chunk_size {
            Some(max) => config.with_max_chunk_size(max),
            None => config,
        })
    }
}

/// Generator configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    /// Strip comments before chunking
    pub preprocess: Option<bool>,
    /// Attach names, imports and complexity to results
    pub extract_metadata: Option<bool>,
    /// Items per batch slice
    pub batch_size: Option<usize>,
}

impl GeneratorSection {
    /// Get preprocess (defaults to true)
    pub fn preprocess(&self) -> bool {
        self.preprocess.unwrap_or(true)
    }

    /// Get extract_metadata (defaults to true)
    pub fn extract_metadata(&self) -> bool {
        self.extract_metadata.unwrap_or(true)
    }

    /// Get batch size (defaults to 32)
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Embeddings kept per generator
    pub size: Option<usize>,
}

impl CacheConfig {
    /// Get cache size (defaults to 1000)
    pub fn size(&self) -> usize {
        self.size.unwrap_or(DEFAULT_CACHE_SIZE)
    }
}

/// Configuration loaded from .dupembedrc.toml or ~/.config/dupembed/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model configuration
    pub model: ModelConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Generator configuration
    pub generator: GeneratorSection,
    /// Cache configuration
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .dupembedrc.toml in current directory
    /// 2. ~/.config/dupembed/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(".dupembedrc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("dupembed").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Read one config file. Missing files yield None; files that fail to
    /// parse are logged and skipped.
    pub fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match Self::parse(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config");
                None
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EmbedError::Config(e.to_string()))
    }

    /// Build a validated generator configuration, applying environment
    /// overrides.
    pub fn generator_config(&self) -> Result<GeneratorConfig> {
        self.generator_config_with(|name| std::env::var(name).ok())
    }

    /// Like [`Config::generator_config`] with a custom variable lookup
    pub fn generator_config_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<GeneratorConfig> {
        let model_name = match lookup(MODEL_ENV).map(|v| v.trim().to_string()) {
            Some(name) if !name.is_empty() => name,
            _ => self.model.name().to_string(),
        };

        let config = GeneratorConfig {
            model_name,
            model_path: self.model.path.clone(),
            chunking: self.chunking.to_chunk_config()?,
            preprocess: self.generator.preprocess(),
            extract_metadata: self.generator.extract_metadata(),
            batch_size: override_usize(&lookup, BATCH_SIZE_ENV, self.generator.batch_size())?,
            cache_size_limit: override_usize(&lookup, CACHE_SIZE_ENV, self.cache.size())?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the configured embedding backend
    pub fn backend(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        let backend: Arc<dyn EmbeddingBackend> = match self.model.backend() {
            BackendType::Fastembed => {
                Arc::new(FastEmbedBackend::from_env().map_err(|e| EmbedError::Config(format!("{e:#}")))?)
            }
            BackendType::Command => Arc::new(CommandBackend::new(self.model.command())),
            BackendType::Hashing => {
                if self.model.dimension() == 0 {
                    return Err(EmbedError::Config("model.dimension must be greater than 0".to_string()));
                }
                Arc::new(HashingBackend::new(self.model.dimension()))
            }
        };
        Ok(backend)
    }
}

/// Trimmed value of `name`, with empty meaning "use the default"
fn override_usize(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> Result<usize> {
    match lookup(name) {
        Some(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .map_err(|_| EmbedError::Config(format!("Invalid {} value: {}", name, value)))
            }
        }
        None => Ok(default),
    }
}
