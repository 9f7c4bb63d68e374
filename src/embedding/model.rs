// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-instance access to a shared model, with an LRU cache of encodings

use anyhow::{anyhow, Context};
use std::path::Path;
use std::sync::Arc;

use crate::cache::{fingerprint, CacheStats, LruCache};
use crate::embedding::provider::{EmbeddingBackend, EncoderModel, ModelKey};
use crate::embedding::registry::ModelRegistry;
use crate::errors::{EmbedError, Result};

/// Default number of cached vectors per instance
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Lazily loads one model through a registry and caches what it encodes.
///
/// The model handle is shared with every other instance using the same
/// registry and key. The cache belongs to this instance alone.
pub struct ModelAccess {
    key: ModelKey,
    backend: Arc<dyn EmbeddingBackend>,
    registry: Arc<ModelRegistry>,
    model: Option<Arc<dyn EncoderModel>>,
    cache: LruCache<String, Vec<f32>>,
}

impl ModelAccess {
    pub fn new(
        key: ModelKey,
        backend: Arc<dyn EmbeddingBackend>,
        registry: Arc<ModelRegistry>,
        cache_size_limit: usize,
    ) -> Self {
        Self {
            key,
            backend,
            registry,
            model: None,
            cache: LruCache::new(cache_size_limit),
        }
    }

    /// Rebuilds access to a model written by [`ModelAccess::save`].
    ///
    /// The reloaded model is registered under its name and `dir`, so other
    /// instances reloading the same directory share it. A registry entry
    /// with a different dimension is replaced by the reloaded model.
    pub fn from_saved(
        dir: &Path,
        backend: Arc<dyn EmbeddingBackend>,
        registry: Arc<ModelRegistry>,
        cache_size_limit: usize,
    ) -> Result<Self> {
        let model = backend.reload(dir).map_err(|source| EmbedError::ModelLoad {
            model: dir.display().to_string(),
            source,
        })?;
        let key = ModelKey::new(model.model_id(), Some(dir.to_path_buf()));
        let model = registry.insert_reloaded(key.clone(), model);
        tracing::info!(model = %key, dimension = model.dimension(), "reloaded saved model");

        Ok(Self {
            key,
            backend,
            registry,
            model: Some(model),
            cache: LruCache::new(cache_size_limit),
        })
    }

    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Vector length, once the model is loaded
    pub fn dimension(&self) -> Option<usize> {
        self.model.as_ref().map(|model| model.dimension())
    }

    /// Loads the model (or adopts the registry's copy) and returns its
    /// dimension. Calling it again is a no-op.
    pub fn load(&mut self) -> Result<usize> {
        Ok(self.ensure_loaded()?.dimension())
    }

    fn ensure_loaded(&mut self) -> Result<Arc<dyn EncoderModel>> {
        if let Some(model) = &self.model {
            return Ok(Arc::clone(model));
        }
        let model = self.registry.get_or_load(&self.key, self.backend.as_ref())?;
        self.model = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Encodes one text, serving repeats from the cache.
    pub fn encode(&mut self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let cache_key = fingerprint(text);
        if let Some(vector) = self.cache.get(&cache_key) {
            tracing::debug!(key = %cache_key, "embedding cache hit");
            return Ok(vector);
        }
        tracing::debug!(key = %cache_key, "embedding cache miss");

        let model = self.ensure_loaded()?;
        let vector = model.encode_one(text).map_err(EmbedError::generation)?;
        check_dimension(&vector, model.dimension())?;

        self.cache.put(cache_key, vector.clone());
        Ok(vector)
    }

    /// Encodes several texts, returning vectors in input order.
    ///
    /// Only texts missing from the cache reach the model. If the model has a
    /// batch entry point the misses go through it in one call, otherwise
    /// they are encoded one by one.
    pub fn encode_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbedError::EmptyInput);
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(usize, String)> = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            let cache_key = fingerprint(text);
            match self.cache.get(&cache_key) {
                Some(vector) => results[idx] = Some(vector),
                None => misses.push((idx, cache_key)),
            }
        }
        tracing::debug!(
            total = texts.len(),
            hits = texts.len() - misses.len(),
            misses = misses.len(),
            "batch cache lookup"
        );

        if !misses.is_empty() {
            let model = self.ensure_loaded()?;
            if model.supports_batch() {
                let pending: Vec<String> = misses.iter().map(|(idx, _)| texts[*idx].clone()).collect();
                let vectors = model.encode_many(&pending).map_err(EmbedError::generation)?;
                if vectors.len() != pending.len() {
                    return Err(EmbedError::generation(anyhow!(
                        "model returned {} vectors for {} texts",
                        vectors.len(),
                        pending.len()
                    )));
                }
                for ((idx, cache_key), vector) in misses.into_iter().zip(vectors) {
                    check_dimension(&vector, model.dimension())?;
                    self.cache.put(cache_key, vector.clone());
                    results[idx] = Some(vector);
                }
            } else {
                for (idx, cache_key) in misses {
                    let vector = model.encode_one(&texts[idx]).map_err(EmbedError::generation)?;
                    check_dimension(&vector, model.dimension())?;
                    self.cache.put(cache_key, vector.clone());
                    results[idx] = Some(vector);
                }
            }
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EmbedError::generation(anyhow!("batch left a text without a vector")))
    }

    /// Persists the model to `dir`, loading it first if needed.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        let model = self.ensure_loaded()?;
        model
            .persist(dir)
            .with_context(|| format!("Failed to save model {} to {}", self.key, dir.display()))
            .map_err(EmbedError::generation)?;
        tracing::info!(model = %self.key, path = %dir.display(), "saved model");
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

impl std::fmt::Debug for ModelAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAccess")
            .field("key", &self.key)
            .field("backend", &self.backend.name())
            .field("loaded", &self.is_loaded())
            .field("cache", &self.cache.stats())
            .finish()
    }
}

fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(EmbedError::generation(anyhow!(
            "model returned a vector of length {}, expected {}",
            vector.len(),
            expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::HashingBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Wraps the hashing backend and records every text it encodes
    struct RecordingBackend {
        inner: HashingBackend,
        batch: bool,
        loads: AtomicUsize,
        seen: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingModel {
        inner: Arc<dyn EncoderModel>,
        batch: bool,
        seen: Arc<Mutex<Vec<String>>>,
        batch_calls: AtomicUsize,
    }

    impl RecordingBackend {
        fn new(batch: bool) -> Self {
            Self {
                inner: HashingBackend::new(12),
                batch,
                loads: AtomicUsize::new(0),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EmbeddingBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn load(&self, key: &ModelKey) -> anyhow::Result<Arc<dyn EncoderModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(RecordingModel {
                inner: self.inner.load(key)?,
                batch: self.batch,
                seen: Arc::clone(&self.seen),
                batch_calls: AtomicUsize::new(0),
            }))
        }

        fn reload(&self, dir: &Path) -> anyhow::Result<Arc<dyn EncoderModel>> {
            self.inner.reload(dir)
        }
    }

    impl EncoderModel for RecordingModel {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn encode_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            self.inner.encode_one(text)
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }

        fn encode_many(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            self.inner.encode_many(texts)
        }

        fn persist(&self, dir: &Path) -> anyhow::Result<()> {
            self.inner.persist(dir)
        }
    }

    /// Returns vectors of the wrong length
    struct ShortBackend;

    struct ShortModel;

    impl EmbeddingBackend for ShortBackend {
        fn name(&self) -> &str {
            "short"
        }

        fn load(&self, _key: &ModelKey) -> anyhow::Result<Arc<dyn EncoderModel>> {
            Ok(Arc::new(ShortModel))
        }

        fn reload(&self, _dir: &Path) -> anyhow::Result<Arc<dyn EncoderModel>> {
            Ok(Arc::new(ShortModel))
        }
    }

    impl EncoderModel for ShortModel {
        fn model_id(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            4
        }

        fn encode_one(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn persist(&self, _dir: &Path) -> anyhow::Result<()> {
            anyhow::bail!("read-only model")
        }
    }

    fn access(backend: Arc<dyn EmbeddingBackend>, registry: Arc<ModelRegistry>, cache: usize) -> ModelAccess {
        ModelAccess::new(ModelKey::new("test-model", None), backend, registry, cache)
    }

    #[test]
    fn test_load_is_lazy_and_idempotent() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend.clone(), Arc::new(ModelRegistry::new()), 10);
        assert!(!model.is_loaded());
        assert_eq!(model.dimension(), None);

        assert_eq!(model.load().unwrap(), 12);
        assert_eq!(model.load().unwrap(), 12);
        assert!(model.is_loaded());
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_instances_share_registry_model() {
        let backend = Arc::new(RecordingBackend::new(true));
        let registry = Arc::new(ModelRegistry::new());
        let mut first = access(backend.clone(), Arc::clone(&registry), 10);
        let mut second = access(backend.clone(), Arc::clone(&registry), 10);

        first.encode("alpha").unwrap();
        second.encode("alpha").unwrap();
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        // Caches are per instance, so the second encode still reached the model
        assert_eq!(backend.seen(), vec!["alpha", "alpha"]);
    }

    #[test]
    fn test_encode_caches_result() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend.clone(), Arc::new(ModelRegistry::new()), 10);

        let a = model.encode("def f(): pass").unwrap();
        let b = model.encode("def f(): pass").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_eq!(backend.seen().len(), 1);

        let stats = model.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_encode_rejects_blank_text() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend.clone(), Arc::new(ModelRegistry::new()), 10);
        assert!(matches!(model.encode(""), Err(EmbedError::EmptyInput)));
        assert!(matches!(model.encode(" \n\t"), Err(EmbedError::EmptyInput)));
        assert!(!model.is_loaded());
    }

    #[test]
    fn test_cache_is_bounded() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend, Arc::new(ModelRegistry::new()), 3);
        for i in 0..10 {
            model.encode(&format!("text {i}")).unwrap();
            assert!(model.cache_stats().entries <= 3);
        }
        assert_eq!(model.cache_stats().evictions, 7);

        model.clear_cache();
        assert_eq!(model.cache_stats().entries, 0);
    }

    #[test]
    fn test_batch_sends_only_misses() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend.clone(), Arc::new(ModelRegistry::new()), 10);
        let cached = model.encode("b").unwrap();

        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let vectors = model.encode_batch(&texts).unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[1], cached);
        assert_eq!(vectors[0], model.encode("a").unwrap());
        assert_eq!(backend.seen(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_batch_without_batch_support_encodes_each() {
        let backend = Arc::new(RecordingBackend::new(false));
        let mut model = access(backend.clone(), Arc::new(ModelRegistry::new()), 10);
        let texts: Vec<String> = vec!["x".into(), "y".into()];

        let vectors = model.encode_batch(&texts).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(backend.seen(), vec!["x", "y"]);

        // Each miss is counted once, not again by a per-text lookup
        let stats = model.cache_stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 0);

        model.encode_batch(&texts).unwrap();
        let stats = model.cache_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(backend.seen().len(), 2);
    }

    #[test]
    fn test_batch_matches_single_encodes() {
        let registry = Arc::new(ModelRegistry::new());
        let backend = Arc::new(RecordingBackend::new(true));
        let mut batched = access(backend.clone(), Arc::clone(&registry), 10);
        let mut single = access(backend, registry, 10);

        let texts: Vec<String> = vec!["fn a() {}".into(), "fn b() {}".into()];
        let vectors = batched.encode_batch(&texts).unwrap();
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(&single.encode(text).unwrap(), vector);
        }
    }

    #[test]
    fn test_empty_batch_does_not_load() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend.clone(), Arc::new(ModelRegistry::new()), 10);
        assert!(model.encode_batch(&[]).unwrap().is_empty());
        assert!(!model.is_loaded());
        assert_eq!(backend.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_batch_rejects_blank_entry() {
        let backend = Arc::new(RecordingBackend::new(true));
        let mut model = access(backend, Arc::new(ModelRegistry::new()), 10);
        let texts: Vec<String> = vec!["ok".into(), "  ".into()];
        assert!(matches!(model.encode_batch(&texts), Err(EmbedError::EmptyInput)));
    }

    #[test]
    fn test_wrong_dimension_is_generation_error() {
        let mut model = access(Arc::new(ShortBackend), Arc::new(ModelRegistry::new()), 10);
        let err = model.encode("hello").unwrap_err();
        assert!(matches!(err, EmbedError::EmbeddingGeneration { .. }));
        assert!(err.to_string().contains("expected 4"));
        assert_eq!(model.cache_stats().entries, 0);
    }

    #[test]
    fn test_save_failure_is_reported() {
        let mut model = access(Arc::new(ShortBackend), Arc::new(ModelRegistry::new()), 10);
        let dir = tempdir().unwrap();
        let err = model.save(dir.path()).unwrap_err();
        assert!(err.to_string().contains("read-only model"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(HashingBackend::new(24));
        let registry = Arc::new(ModelRegistry::new());

        let mut original = access(Arc::clone(&backend), Arc::clone(&registry), 10);
        let before = original.encode("class Foo: pass").unwrap();
        original.save(dir.path()).unwrap();

        let mut reloaded = ModelAccess::from_saved(dir.path(), backend, registry, 10).unwrap();
        assert!(reloaded.is_loaded());
        assert_eq!(reloaded.dimension(), Some(24));
        assert_eq!(reloaded.key().model_path.as_deref(), Some(dir.path()));
        assert_eq!(reloaded.encode("class Foo: pass").unwrap(), before);
    }

    #[test]
    fn test_reload_after_directory_is_saved_again() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new());

        let small: Arc<dyn EmbeddingBackend> = Arc::new(HashingBackend::new(8));
        access(Arc::clone(&small), Arc::new(ModelRegistry::new()), 10)
            .save(dir.path())
            .unwrap();
        let first = ModelAccess::from_saved(dir.path(), Arc::clone(&small), Arc::clone(&registry), 10).unwrap();
        assert_eq!(first.dimension(), Some(8));

        let large: Arc<dyn EmbeddingBackend> = Arc::new(HashingBackend::new(16));
        access(Arc::clone(&large), Arc::new(ModelRegistry::new()), 10)
            .save(dir.path())
            .unwrap();
        let mut second = ModelAccess::from_saved(dir.path(), large, Arc::clone(&registry), 10).unwrap();
        assert_eq!(second.dimension(), Some(16));
        assert_eq!(second.encode("int x;").unwrap().len(), 16);
        assert_eq!(registry.len(), 1);

        // Earlier handles stay usable with the model they loaded
        assert_eq!(first.dimension(), Some(8));
    }

    #[test]
    fn test_reload_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = ModelAccess::from_saved(
            &missing,
            Arc::new(HashingBackend::new(8)),
            Arc::new(ModelRegistry::new()),
            10,
        );
        assert!(matches!(result, Err(EmbedError::ModelLoad { .. })));
    }
}
