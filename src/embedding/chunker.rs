// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! Source code is split into bounded pieces before embedding. Three
//! strategies are available:
//! - `fixed_size`: character windows with overlap, snapped to whitespace
//! - `function_based`: one chunk per top-level definition
//! - `semantic`: line walk that prefers to break at top-level constructs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cache::{fingerprint_parts, CacheStats, FillOnceCache};
use crate::errors::{EmbedError, Result};
use crate::parser::languages::Language;
use crate::preprocess::CodePreprocessor;

/// Default window width in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default overlap between consecutive fixed-size windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Number of function-based results kept per chunker.
pub const FUNCTION_CACHE_CAPACITY: usize = 100;

/// A window is snapped back to whitespace only when the whitespace lies past
/// this fraction of the window (in tenths).
const SNAP_THRESHOLD_TENTHS: usize = 7;

/// Chunking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    FixedSize,
    #[default]
    FunctionBased,
    Semantic,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::FixedSize => "fixed_size",
            ChunkStrategy::FunctionBased => "function_based",
            ChunkStrategy::Semantic => "semantic",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed_size" => Ok(ChunkStrategy::FixedSize),
            "function_based" => Ok(ChunkStrategy::FunctionBased),
            "semantic" => Ok(ChunkStrategy::Semantic),
            _ => Err(EmbedError::InvalidStrategy(s.to_string())),
        }
    }
}

/// Configuration for the text chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    pub strategy: ChunkStrategy,
    /// Window width in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive fixed-size windows.
    pub overlap: usize,
    /// Upper bound for semantic chunks; `2 * chunk_size` when unset.
    pub max_chunk_size: Option<usize>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            max_chunk_size: None,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig with the specified parameters.
    pub fn new(strategy: ChunkStrategy, chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            strategy,
            chunk_size,
            overlap,
            max_chunk_size: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the semantic chunk bound.
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = Some(size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EmbedError::InvalidChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(EmbedError::InvalidOverlap {
                overlap: self.overlap,
                chunk_size: self.chunk_size,
            });
        }
        if self.max_chunk_size == Some(0) {
            return Err(EmbedError::InvalidChunkSize);
        }
        Ok(())
    }

    /// Effective semantic chunk bound.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size.unwrap_or(self.chunk_size * 2)
    }
}

/// A chunk of source text with its line range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub text: String,
    /// Starting line number (1-indexed).
    pub start_line: usize,
    /// Ending line number (1-indexed, inclusive).
    pub end_line: usize,
}

/// Splits source text into chunks using the configured strategy.
pub struct ChunkingStrategy {
    config: ChunkConfig,
    preprocessor: CodePreprocessor,
    function_cache: FillOnceCache<String, Vec<Chunk>>,
}

impl ChunkingStrategy {
    /// Creates a chunker, rejecting invalid sizes.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            preprocessor: CodePreprocessor::new(),
            function_cache: FillOnceCache::new(FUNCTION_CACHE_CAPACITY),
        })
    }

    /// Creates a chunker with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
            preprocessor: CodePreprocessor::new(),
            function_cache: FillOnceCache::new(FUNCTION_CACHE_CAPACITY),
        }
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits text using the configured strategy. Blank input yields no chunks.
    pub fn chunk(&mut self, text: &str, language: Language) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.config.strategy {
            ChunkStrategy::FixedSize => self.chunk_fixed_size(text),
            ChunkStrategy::FunctionBased => self.chunk_by_function(text, language),
            ChunkStrategy::Semantic => self.chunk_semantic(text, language),
        }
    }

    /// Sliding character windows of `chunk_size` with `overlap`.
    ///
    /// Algorithm:
    /// ```text
    /// start = 0
    /// while start < len:
    ///   end = min(start + chunk_size, len)
    ///   if end < len and whitespace exists in (start + 0.7 * chunk_size, end):
    ///     end = last such whitespace
    ///   emit text[start..end] unless blank
    ///   if end == len: stop
    ///   next = end - overlap; start = next > start ? next : end
    /// ```
    pub fn chunk_fixed_size(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.overlap;

        // newlines_before[i] = number of '\n' in chars[..i]
        let mut newlines_before = Vec::with_capacity(total + 1);
        newlines_before.push(0);
        for ch in &chars {
            let last = *newlines_before.last().unwrap_or(&0);
            newlines_before.push(last + usize::from(*ch == '\n'));
        }

        let mut chunks = Vec::new();
        let mut start = 0_usize;

        while start < total {
            let mut end = (start + chunk_size).min(total);

            if end < total {
                let snapped = (start..end)
                    .rev()
                    .find(|&idx| chars[idx].is_whitespace())
                    .filter(|&idx| (idx - start) * 10 > chunk_size * SNAP_THRESHOLD_TENTHS);
                if let Some(boundary) = snapped {
                    end = boundary;
                }
            }

            let chunk_text: String = chars[start..end].iter().collect();
            if !chunk_text.trim().is_empty() {
                let last_char = end.saturating_sub(1).max(start);
                chunks.push(Chunk {
                    text: chunk_text,
                    start_line: newlines_before[start] + 1,
                    end_line: newlines_before[last_char] + 1,
                });
            }

            if end >= total {
                break;
            }

            // Overlap must not stall the cursor
            let next = end.saturating_sub(overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// One chunk per top-level definition, falling back to fixed-size windows
    /// when no definitions are found.
    pub fn chunk_by_function(&mut self, text: &str, language: Language) -> Vec<Chunk> {
        let key = fingerprint_parts(&[text, language.as_str()]);
        if let Some(chunks) = self.function_cache.get(&key) {
            tracing::debug!(%language, "function chunk cache hit");
            return chunks;
        }

        let chunks: Vec<Chunk> = self
            .preprocessor
            .extract_spans(text, language)
            .into_iter()
            .filter_map(|span| {
                let trimmed = span.text.trim();
                (!trimmed.is_empty()).then(|| Chunk {
                    text: trimmed.to_string(),
                    start_line: span.start_line,
                    end_line: span.end_line,
                })
            })
            .collect();

        let chunks = if chunks.is_empty() {
            tracing::debug!(%language, "no definitions found, using fixed-size chunks");
            self.chunk_fixed_size(text)
        } else {
            chunks
        };

        if !self.function_cache.insert(key, chunks.clone()) {
            tracing::debug!(
                capacity = FUNCTION_CACHE_CAPACITY,
                "function chunk cache full, result not cached"
            );
        }
        chunks
    }

    /// Line walk that flushes at top-level constructs once the buffer is half
    /// full, and unconditionally once it exceeds `max_chunk_size`.
    pub fn chunk_semantic(&mut self, text: &str, language: Language) -> Vec<Chunk> {
        let Some(boundary) = semantic_boundary(language) else {
            tracing::debug!(%language, "no semantic walker, using function-based chunks");
            return self.chunk_by_function(text, language);
        };

        let max_size = self.config.max_chunk_size();
        let mut chunks = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();
        let mut buffer_size = 0_usize;
        let mut buffer_start = 1_usize;

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;

            if boundary.is_match(line) && buffer_size > max_size / 2 {
                flush_lines(&mut chunks, &mut buffer, buffer_start);
                buffer_size = 0;
            }

            if buffer.is_empty() {
                if line.trim().is_empty() {
                    continue;
                }
                buffer_start = line_no;
            }
            buffer.push(line);
            buffer_size += line.chars().count() + 1;

            if buffer_size > max_size {
                flush_lines(&mut chunks, &mut buffer, buffer_start);
                buffer_size = 0;
            }
        }
        flush_lines(&mut chunks, &mut buffer, buffer_start);

        if chunks.is_empty() {
            return self.chunk_fixed_size(text);
        }
        chunks
    }

    /// Number of cached function-based results.
    pub fn function_cache_len(&self) -> usize {
        self.function_cache.len()
    }

    pub fn function_cache_stats(&self) -> CacheStats {
        self.function_cache.stats()
    }
}

fn flush_lines(chunks: &mut Vec<Chunk>, buffer: &mut Vec<&str>, start_line: usize) {
    if buffer.is_empty() {
        return;
    }
    let text = buffer.join("\n");
    let trimmed = text.trim_end();
    if !trimmed.trim().is_empty() {
        let trailing_blank = buffer.iter().rev().take_while(|l| l.trim().is_empty()).count();
        chunks.push(Chunk {
            text: trimmed.to_string(),
            start_line,
            end_line: start_line + buffer.len() - 1 - trailing_blank,
        });
    }
    buffer.clear();
}

static PYTHON_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:import\s|from\s+\S+\s+import\s|class\s|def\s|async\s+def\s|@|if\s+__name__\s*==\s*['"]__main__['"])"#)
        .unwrap()
});

static JAVASCRIPT_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:import\s|export\s|function[\s*]|async\s+function\s|class\s|(?:const|let|var)\s+[\w$]+\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[\w$]+\s*=>)|require\()")
        .unwrap()
});

/// Lines that open a new top-level construct, for languages with a walker
fn semantic_boundary(language: Language) -> Option<&'static Regex> {
    match language {
        Language::Python => Some(&PYTHON_BOUNDARY),
        Language::JavaScript => Some(&JAVASCRIPT_BOUNDARY),
        Language::Java | Language::Cpp => None,
    }
}
