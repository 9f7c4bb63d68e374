// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared registry of loaded models.
//!
//! Loading a model is expensive, so every [`ModelAccess`] that asks for the
//! same [`ModelKey`] gets the same handle. All reads and writes happen under
//! one mutex, and a load runs while that mutex is held so a key is never
//! loaded twice. Handles are never removed.
//!
//! [`ModelRegistry::global`] returns the process-wide instance. Code that
//! needs isolation (tests, embedding several backends side by side) creates
//! its own registry and passes it in.
//!
//! [`ModelAccess`]: crate::embedding::model::ModelAccess

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::embedding::provider::{EmbeddingBackend, EncoderModel, ModelKey};
use crate::errors::{EmbedError, Result};

static GLOBAL_REGISTRY: Lazy<Arc<ModelRegistry>> = Lazy::new(|| Arc::new(ModelRegistry::new()));

/// Map of model key to loaded model
#[derive(Default)]
pub struct ModelRegistry {
    models: Mutex<HashMap<ModelKey, Arc<dyn EncoderModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<ModelRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModelKey, Arc<dyn EncoderModel>>> {
        // Entries are inserted whole, so a panic elsewhere cannot leave one half-built
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the model for `key`, loading it through `backend` on first use.
    pub fn get_or_load(
        &self,
        key: &ModelKey,
        backend: &dyn EmbeddingBackend,
    ) -> Result<Arc<dyn EncoderModel>> {
        let mut models = self.lock();
        if let Some(model) = models.get(key) {
            tracing::debug!(model = %key, "adopting shared model");
            return Ok(Arc::clone(model));
        }

        tracing::info!(model = %key, backend = backend.name(), "loading model");
        let model = backend.load(key).map_err(|source| EmbedError::ModelLoad {
            model: key.to_string(),
            source,
        })?;
        if model.dimension() == 0 {
            return Err(EmbedError::ModelLoad {
                model: key.to_string(),
                source: anyhow::anyhow!("model reports an embedding dimension of 0"),
            });
        }

        models.insert(key.clone(), Arc::clone(&model));
        Ok(model)
    }

    /// Registers a model reloaded from disk. An existing entry with the same
    /// dimension is kept and returned. One with a different dimension came
    /// from an older save of the directory and is replaced.
    pub fn insert_reloaded(&self, key: ModelKey, model: Arc<dyn EncoderModel>) -> Arc<dyn EncoderModel> {
        let mut models = self.lock();
        if let Some(existing) = models.get(&key) {
            if existing.dimension() == model.dimension() {
                return Arc::clone(existing);
            }
            tracing::info!(
                model = %key,
                old_dimension = existing.dimension(),
                new_dimension = model.dimension(),
                "replacing stale registry entry"
            );
        }
        models.insert(key, Arc::clone(&model));
        model
    }

    pub fn get(&self, key: &ModelKey) -> Option<Arc<dyn EncoderModel>> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let models = self.lock();
        let keys: Vec<String> = models.keys().map(ToString::to_string).collect();
        f.debug_struct("ModelRegistry").field("models", &keys).finish()
    }
}
