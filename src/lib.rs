// SPDX-License-Identifier: MIT OR Apache-2.0

//! dupembed - Source code embeddings for duplicate detection
//!
//! Turns source code into vectors: comments are stripped, the text is split
//! into chunks, each chunk is encoded by a shared embedding model and the
//! chunk vectors are averaged. Two vectors are compared with
//! [`calculate_similarity`].

pub mod cache;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod generator;
pub mod logging;
pub mod metadata;
pub mod parser;
pub mod preprocess;

pub use config::Config;
pub use embedding::{calculate_similarity, EmbeddingBackend, HashingBackend, ModelRegistry};
pub use errors::{EmbedError, Result};
pub use generator::{CodeEmbeddingGenerator, EmbeddingMetadata, GenerationResult, GeneratorConfig};
pub use metadata::CodeMetadata;
pub use parser::Language;
pub use preprocess::CodePreprocessor;
