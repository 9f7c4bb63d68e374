// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the embedding pipeline using the hashing backend

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dupembed::embedding::{
    ChunkConfig, ChunkStrategy, EncoderModel, ModelAccess, ModelKey, SUPPORTED_MODELS,
};
use dupembed::{
    calculate_similarity, CodeEmbeddingGenerator, EmbedError, EmbeddingBackend, GeneratorConfig,
    HashingBackend, Language, ModelRegistry,
};
use tempfile::TempDir;

const FIBONACCI: &str = r#"
def fibonacci(n):
    """Return the n-th Fibonacci number."""
    if n < 2:
        return n
    return fibonacci(n - 1) + fibonacci(n - 2)
"#;

const FIBONACCI_COMMENTED: &str = r#"
# Classic recursive version
def fibonacci(n):
    """Return the n-th Fibonacci number."""
    if n < 2:  # base case
        return n
    return fibonacci(n - 1) + fibonacci(n - 2)
"#;

const FILE_PARSER: &str = r#"
import json

class ConfigLoader:
    def __init__(self, path):
        self.path = path

    def load(self):
        with open(self.path) as handle:
            return json.load(handle)
"#;

/// Hashing backend that counts model loads
struct CountingBackend {
    inner: HashingBackend,
    loads: AtomicUsize,
}

impl CountingBackend {
    fn new(dimension: usize) -> Self {
        Self {
            inner: HashingBackend::new(dimension),
            loads: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingBackend for CountingBackend {
    fn name(&self) -> &str {
        "hashing"
    }

    fn load(&self, key: &ModelKey) -> anyhow::Result<Arc<dyn EncoderModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(key)
    }

    fn reload(&self, dir: &Path) -> anyhow::Result<Arc<dyn EncoderModel>> {
        self.inner.reload(dir)
    }
}

fn generator_with(config: GeneratorConfig) -> CodeEmbeddingGenerator {
    CodeEmbeddingGenerator::new(
        config,
        Arc::new(HashingBackend::new(64)),
        Arc::new(ModelRegistry::new()),
    )
    .unwrap()
}

fn generator() -> CodeEmbeddingGenerator {
    generator_with(GeneratorConfig::default())
}

#[test]
fn test_embedding_is_deterministic() {
    let mut first = generator();
    let mut second = generator();

    let a = first.generate_embedding(FIBONACCI, "python").unwrap();
    let b = second.generate_embedding(FIBONACCI, "python").unwrap();
    let c = first.generate_embedding(FIBONACCI, "python").unwrap();

    assert_eq!(a.embedding, b.embedding);
    assert_eq!(a.embedding, c.embedding);
    assert_eq!(a.embedding.len(), 64);
}

#[test]
fn test_comments_do_not_change_embedding() {
    let mut gen = generator();
    let plain = gen.generate_embedding(FIBONACCI, "python").unwrap();
    let commented = gen.generate_embedding(FIBONACCI_COMMENTED, "python").unwrap();

    assert_eq!(plain.embedding, commented.embedding);
    let sim = calculate_similarity(&plain.embedding, &commented.embedding).unwrap();
    assert!((sim - 1.0).abs() < 1e-5);
}

#[test]
fn test_similarity_ranks_duplicates_higher() {
    let mut gen = generator();
    let fib = gen.generate_embedding(FIBONACCI, "python").unwrap();
    let renamed = gen
        .generate_embedding(&FIBONACCI.replace("n < 2", "n <= 1"), "python")
        .unwrap();
    let unrelated = gen.generate_embedding(FILE_PARSER, "python").unwrap();

    let near = gen.calculate_similarity(&fib.embedding, &renamed.embedding).unwrap();
    let far = gen.calculate_similarity(&fib.embedding, &unrelated.embedding).unwrap();
    assert!((0.0..=1.0).contains(&near));
    assert!((0.0..=1.0).contains(&far));
    assert!(near > far);

    let reversed = gen.calculate_similarity(&unrelated.embedding, &fib.embedding).unwrap();
    assert_eq!(far, reversed);
}

#[test]
fn test_similarity_dimension_mismatch() {
    let err = calculate_similarity(&[0.1, 0.2, 0.3], &[0.1, 0.2]).unwrap_err();
    assert!(matches!(err, EmbedError::DimensionMismatch { left: 3, right: 2 }));
}

#[test]
fn test_metadata_describes_source() {
    let mut gen = generator();
    let result = gen.generate_embedding(FILE_PARSER, "python").unwrap();
    let meta = &result.metadata;

    assert_eq!(meta.language, Language::Python);
    assert_eq!(meta.strategy, ChunkStrategy::FunctionBased);
    assert_eq!(meta.chunk_count, 1);
    assert_eq!(meta.embedding_dim, 64);

    let code = meta.code.as_ref().unwrap();
    assert_eq!(code.class_names, vec!["ConfigLoader"]);
    assert_eq!(code.function_names, vec!["__init__", "load"]);
    assert_eq!(code.imports, vec!["import json"]);
    // with + two methods
    assert_eq!(code.complexity_score, 3);
}

#[test]
fn test_function_based_chunks_are_averaged() {
    let source = "def a():\n    return 1\n\ndef b():\n    return 2\n\ndef c():\n    return 3\n";
    let mut gen = generator();
    let result = gen.generate_embedding(source, "python").unwrap();
    assert_eq!(result.metadata.chunk_count, 3);

    let stats = gen.model().cache_stats();
    assert_eq!(stats.entries, 3);
}

#[test]
fn test_registry_shared_across_generators() {
    let backend = Arc::new(CountingBackend::new(32));
    let registry = Arc::new(ModelRegistry::new());

    let mut generators: Vec<_> = (0..3)
        .map(|_| {
            CodeEmbeddingGenerator::new(
                GeneratorConfig::default(),
                backend.clone(),
                Arc::clone(&registry),
            )
            .unwrap()
        })
        .collect();
    for gen in &mut generators {
        gen.generate_embedding("int main() { return 0; }", "cpp").unwrap();
    }

    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);

    let other_model = GeneratorConfig {
        model_name: SUPPORTED_MODELS[1].to_string(),
        ..Default::default()
    };
    let mut other = CodeEmbeddingGenerator::new(other_model, backend.clone(), Arc::clone(&registry)).unwrap();
    other.generate_embedding("int main() { return 0; }", "cpp").unwrap();
    assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cache_stays_bounded() {
    let config = GeneratorConfig {
        cache_size_limit: 4,
        ..Default::default()
    };
    let mut gen = generator_with(config);
    for i in 0..20 {
        let code = format!("function f{i}() {{ return {i}; }}");
        gen.generate_embedding(&code, "javascript").unwrap();
        assert!(gen.model().cache_stats().entries <= 4);
    }
    assert_eq!(gen.model().cache_stats().evictions, 16);
}

#[test]
fn test_batch_preserves_order() {
    let mut gen = generator();
    let items = [
        (FIBONACCI, "python"),
        ("public class A { void run() {} }", "java"),
        (FILE_PARSER, "py"),
    ];
    let results = gen.generate_embeddings_batch(&items).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[1].metadata.language, Language::Java);

    let single = gen.generate_embedding(FILE_PARSER, "python").unwrap();
    assert_eq!(results[2].embedding, single.embedding);
}

#[test]
fn test_batch_aborts_on_first_error() {
    let config = GeneratorConfig {
        batch_size: 1,
        ..Default::default()
    };
    let mut gen = generator_with(config);
    let items = vec![
        ("x = 1".to_string(), "python".to_string()),
        ("   ".to_string(), "python".to_string()),
        ("y = 2".to_string(), "python".to_string()),
    ];
    let err = gen.generate_embeddings_batch(&items).unwrap_err();
    assert!(matches!(err, EmbedError::EmptyInput));
    // Only the first item reached the model
    assert_eq!(gen.model().cache_stats().entries, 1);
}

#[test]
fn test_empty_input() {
    let mut gen = generator();
    assert!(matches!(gen.generate_embedding("", "python"), Err(EmbedError::EmptyInput)));
    assert!(matches!(gen.model_mut().encode(""), Err(EmbedError::EmptyInput)));
}

#[test]
fn test_unsupported_language() {
    let mut gen = generator();
    let err = gen.generate_embedding("package main", "go").unwrap_err();
    assert!(matches!(err, EmbedError::UnsupportedLanguage(ref tag) if tag == "go"));
}

#[test]
fn test_fixed_size_strategy() {
    let config = GeneratorConfig {
        chunking: ChunkConfig::new(ChunkStrategy::FixedSize, 50, 10).unwrap(),
        ..Default::default()
    };
    let mut gen = generator_with(config);
    let source = "int value = 1;\n".repeat(20);
    let result = gen.generate_embedding(&source, "cpp").unwrap();
    assert!(result.metadata.chunk_count > 1);
    assert_eq!(result.embedding.len(), 64);
}

#[test]
fn test_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loader.py");
    fs::write(&path, FILE_PARSER).unwrap();

    let mut gen = generator();
    let result = gen.generate_embedding_from_file(&path).unwrap();
    assert_eq!(result.metadata.language, Language::Python);
    assert_eq!(result.metadata.file_path.as_deref(), Some(path.as_path()));
    assert_eq!(result.metadata.file_size, Some(FILE_PARSER.len() as u64));

    let direct = gen.generate_embedding(FILE_PARSER, "python").unwrap();
    assert_eq!(result.embedding, direct.embedding);
}

#[test]
fn test_from_file_errors() {
    let dir = TempDir::new().unwrap();
    let mut gen = generator();

    let missing = dir.path().join("missing.py");
    assert!(matches!(
        gen.generate_embedding_from_file(&missing),
        Err(EmbedError::FileNotFound(ref p)) if p == &missing
    ));

    let ruby = dir.path().join("script.rb");
    fs::write(&ruby, "puts 'hi'").unwrap();
    assert!(matches!(
        gen.generate_embedding_from_file(&ruby),
        Err(EmbedError::UnsupportedLanguage(ref ext)) if ext == ".rb"
    ));
}

#[test]
fn test_save_and_reload_model() {
    let dir = TempDir::new().unwrap();
    let backend: Arc<dyn EmbeddingBackend> = Arc::new(HashingBackend::new(64));
    let registry = Arc::new(ModelRegistry::new());

    let mut gen = CodeEmbeddingGenerator::new(
        GeneratorConfig::default(),
        Arc::clone(&backend),
        Arc::clone(&registry),
    )
    .unwrap();
    let original = gen.generate_embedding(FIBONACCI, "python").unwrap();
    gen.model_mut().save(dir.path()).unwrap();

    let mut reloaded = ModelAccess::from_saved(dir.path(), backend, registry, 10).unwrap();
    let chunk = FIBONACCI.trim();
    let vector = reloaded.encode(chunk).unwrap();
    assert_eq!(vector, gen.model_mut().encode(chunk).unwrap());
    assert_eq!(vector.len(), original.embedding.len());
}

#[test]
fn test_result_serializes_to_json() {
    let mut gen = generator();
    let result = gen.generate_embedding(FIBONACCI, "python").unwrap();
    let json = serde_json::to_string(&result).unwrap();
    let parsed: dupembed::GenerationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.metadata, result.metadata);
    assert_eq!(parsed.embedding.len(), result.embedding.len());
}
