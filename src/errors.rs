// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for dupembed
//!
//! Configuration errors are returned from constructors. Per-call errors
//! (blank input, unknown language, backend failure) are returned from the
//! call that hit them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the embedding pipeline
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Blank text was submitted for normalization or encoding
    #[error("input text is empty or whitespace-only")]
    EmptyInput,

    /// Language tag outside the supported set
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("chunk_size must be greater than 0")]
    InvalidChunkSize,

    #[error("overlap ({overlap}) must be less than chunk_size ({chunk_size})")]
    InvalidOverlap { overlap: usize, chunk_size: usize },

    #[error("unknown chunking strategy '{0}' (expected fixed_size, function_based or semantic)")]
    InvalidStrategy(String),

    #[error("unsupported model '{0}'")]
    UnsupportedModel(String),

    /// The embedding backend could not produce a usable model
    #[error("failed to load model '{model}': {source:#}")]
    ModelLoad {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    /// The backend failed while encoding, or the pipeline failed unexpectedly
    #[error("embedding generation failed: {source:#}")]
    EmbeddingGeneration {
        #[source]
        source: anyhow::Error,
    },

    #[error("vector dimensions differ ({left} vs {right})")]
    DimensionMismatch { left: usize, right: usize },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EmbedError {
    /// Wraps any failure as an [`EmbedError::EmbeddingGeneration`].
    pub fn generation(source: impl Into<anyhow::Error>) -> Self {
        EmbedError::EmbeddingGeneration {
            source: source.into(),
        }
    }

    /// Returns true for errors raised while validating configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EmbedError::InvalidChunkSize
                | EmbedError::InvalidOverlap { .. }
                | EmbedError::InvalidStrategy(_)
                | EmbedError::UnsupportedModel(_)
                | EmbedError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;
