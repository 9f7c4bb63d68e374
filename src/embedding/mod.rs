// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - chunking, model access and vector math
//!
//! Models are loaded through an [`EmbeddingBackend`], shared process-wide
//! through a [`ModelRegistry`] and wrapped per caller in a [`ModelAccess`]
//! that caches encodings.

pub mod chunker;
pub mod model;
pub mod provider;
pub mod registry;
pub mod similarity;

pub use chunker::{Chunk, ChunkConfig, ChunkStrategy, ChunkingStrategy};
pub use model::ModelAccess;
pub use provider::{
    CommandBackend, EmbeddingBackend, EncoderModel, FastEmbedBackend, FastEmbedConfig,
    HashingBackend, ModelKey, ModelManifest, DEFAULT_MODEL, SUPPORTED_MODELS,
};
pub use registry::ModelRegistry;
pub use similarity::{calculate_similarity, mean_pool};
