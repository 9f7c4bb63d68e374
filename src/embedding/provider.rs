// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding backend interface and implementations.
//!
//! A backend turns a [`ModelKey`] into a loaded [`EncoderModel`]. Loaded
//! models are shared across threads, so encoders are `Send + Sync` and take
//! `&self`; implementations that need exclusive access lock internally.

use anyhow::{bail, Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

/// Model used when nothing is configured.
pub const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

/// Model names accepted by the generator.
pub const SUPPORTED_MODELS: &[&str] = &[
    "all-minilm-l6-v2",
    "bge-small-en-v1.5",
    "bge-base-en-v1.5",
    "nomic-embed-text-v1.5",
    "jina-embeddings-v2-base-code",
];

/// File written by `persist` and read back by `reload`.
pub const MANIFEST_FILE: &str = "model.json";

const DEFAULT_FASTEMBED_BATCH_SIZE: usize = 256;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
const DEFAULT_FASTEMBED_MAX_CHARS: usize = 2000;
const DIMENSION_PROBE: &str = "dimension probe";

/// Returns true if `name` is one of [`SUPPORTED_MODELS`].
pub fn is_supported_model(name: &str) -> bool {
    SUPPORTED_MODELS.contains(&name.trim().to_lowercase().as_str())
}

/// Identity of a loaded model in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_name: String,
    /// Where model files live; backend default when None.
    pub model_path: Option<PathBuf>,
}

impl ModelKey {
    pub fn new(model_name: impl Into<String>, model_path: Option<PathBuf>) -> Self {
        Self {
            model_name: model_name.into(),
            model_path,
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.model_path {
            Some(path) => write!(f, "{}@{}", self.model_name, path.display()),
            None => write!(f, "{}", self.model_name),
        }
    }
}

/// A loaded model able to encode text.
pub trait EncoderModel: Send + Sync {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Length of every vector this model produces.
    fn dimension(&self) -> usize;

    /// Generates an embedding for a single text.
    fn encode_one(&self, text: &str) -> Result<Vec<f32>>;

    /// Whether `encode_many` is a real batch entry point.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Generates embeddings for the given texts, in order.
    fn encode_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode_one(text)).collect()
    }

    /// Writes enough state to `dir` for [`EmbeddingBackend::reload`] to
    /// rebuild an identical encoder.
    fn persist(&self, dir: &Path) -> Result<()>;
}

/// Something that can load models.
pub trait EmbeddingBackend: Send + Sync {
    /// Short backend identifier stored in manifests.
    fn name(&self) -> &str;

    /// Loads the model identified by `key`.
    fn load(&self, key: &ModelKey) -> Result<Arc<dyn EncoderModel>>;

    /// Rebuilds a model from a directory written by [`EncoderModel::persist`].
    fn reload(&self, dir: &Path) -> Result<Arc<dyn EncoderModel>>;
}

/// Contents of [`MANIFEST_FILE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub backend: String,
    pub model_name: String,
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ModelManifest {
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize model manifest")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    fn expect_backend(&self, backend: &str) -> Result<()> {
        if self.backend != backend {
            bail!(
                "Model was saved by the '{}' backend, cannot reload with '{}'",
                self.backend,
                backend
            );
        }
        Ok(())
    }
}

/// Configuration for the fastembed backend.
#[derive(Debug, Clone)]
pub struct FastEmbedConfig {
    pub batch_size: usize,
    pub max_chars: usize,
    pub normalize: bool,
    pub show_download_progress: bool,
}

impl Default for FastEmbedConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
            max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
            normalize: true,
            show_download_progress: false,
        }
    }
}

impl FastEmbedConfig {
    pub fn from_env() -> Result<Self> {
        let mut batch_size = parse_usize_env("FASTEMBED_BATCH_SIZE", DEFAULT_FASTEMBED_BATCH_SIZE)?;
        if batch_size == 0 {
            batch_size = DEFAULT_FASTEMBED_BATCH_SIZE;
        }
        if batch_size > MAX_FASTEMBED_BATCH_SIZE {
            tracing::warn!(
                batch_size,
                max = MAX_FASTEMBED_BATCH_SIZE,
                "FASTEMBED_BATCH_SIZE exceeds maximum; clamping"
            );
            batch_size = MAX_FASTEMBED_BATCH_SIZE;
        }

        let mut max_chars = parse_usize_env("FASTEMBED_MAX_CHARS", DEFAULT_FASTEMBED_MAX_CHARS)?;
        if max_chars == 0 {
            max_chars = DEFAULT_FASTEMBED_MAX_CHARS;
        }

        let normalize = parse_bool_env("FASTEMBED_NORMALIZE", true)?;

        Ok(Self {
            batch_size,
            max_chars,
            normalize,
            show_download_progress: false,
        })
    }
}

/// Backend running ONNX models in-process through fastembed.
#[derive(Debug, Clone, Default)]
pub struct FastEmbedBackend {
    config: FastEmbedConfig,
}

impl FastEmbedBackend {
    pub fn new(config: FastEmbedConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(FastEmbedConfig::from_env()?))
    }

    fn open(&self, model_name: &str, cache_dir: Option<PathBuf>) -> Result<Arc<dyn EncoderModel>> {
        let model = fastembed_model(model_name)?;
        let mut init = InitOptions::new(model).with_show_download_progress(self.config.show_download_progress);
        if let Some(dir) = cache_dir.clone() {
            init = init.with_cache_dir(dir);
        }

        tracing::info!(model = model_name, "initializing fastembed model");
        let embedder = TextEmbedding::try_new(init)
            .with_context(|| format!("Failed to initialize fastembed model {}", model_name))?;

        let mut encoder = FastEmbedder {
            embedder: Mutex::new(embedder),
            config: self.config.clone(),
            model_id: model_name.to_string(),
            cache_dir,
            dimension: 0,
        };
        encoder.dimension = encoder.encode_one(DIMENSION_PROBE)?.len();
        if encoder.dimension == 0 {
            bail!("fastembed model {} produced an empty embedding", model_name);
        }
        Ok(Arc::new(encoder))
    }
}

impl EmbeddingBackend for FastEmbedBackend {
    fn name(&self) -> &str {
        "fastembed"
    }

    fn load(&self, key: &ModelKey) -> Result<Arc<dyn EncoderModel>> {
        self.open(&key.model_name, key.model_path.clone())
    }

    fn reload(&self, dir: &Path) -> Result<Arc<dyn EncoderModel>> {
        let manifest = ModelManifest::read(dir)?;
        manifest.expect_backend(self.name())?;
        self.open(&manifest.model_name, manifest.cache_dir)
    }
}

fn fastembed_model(name: &str) -> Result<EmbeddingModel> {
    match name.trim().to_lowercase().as_str() {
        "all-minilm-l6-v2" | "minilm" | "sentence-transformers/all-minilm-l6-v2" => {
            Ok(EmbeddingModel::AllMiniLML6V2)
        }
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "jina-embeddings-v2-base-code" => Ok(EmbeddingModel::JinaEmbeddingsV2BaseCode),
        other => bail!(
            "Unsupported fastembed model '{}'. Supported values: {}",
            other,
            SUPPORTED_MODELS.join(", ")
        ),
    }
}

/// A fastembed model loaded into memory.
pub struct FastEmbedder {
    embedder: Mutex<TextEmbedding>,
    config: FastEmbedConfig,
    model_id: String,
    cache_dir: Option<PathBuf>,
    dimension: usize,
}

impl FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = truncate_texts(texts, self.config.max_chars);
        let mut embeddings = {
            let mut embedder = self
                .embedder
                .lock()
                .map_err(|_| anyhow::anyhow!("fastembed model lock poisoned"))?;
            embedder.embed(&prepared, Some(self.config.batch_size))?
        };

        if self.config.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }
}

impl EncoderModel for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn encode_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts)
    }

    fn persist(&self, dir: &Path) -> Result<()> {
        ModelManifest {
            backend: "fastembed".to_string(),
            model_name: self.model_id.clone(),
            dimension: self.dimension,
            cache_dir: self.cache_dir.clone(),
            command: None,
        }
        .write(dir)
    }
}

/// Backend that shells out to an external process.
///
/// The command receives `{"model": ..., "texts": [...]}` on stdin and must
/// print either a JSON array of vectors or an object holding one under
/// `embeddings`, `vectors` or `data`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: String,
}

impl CommandBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn open(&self, command: &str, model: &str) -> Result<Arc<dyn EncoderModel>> {
        let mut encoder = CommandEncoder {
            command: command.to_string(),
            model: model.to_string(),
            dimension: 0,
        };
        encoder.dimension = encoder.encode_one(DIMENSION_PROBE)?.len();
        if encoder.dimension == 0 {
            bail!("Embedding command returned an empty vector for model {}", model);
        }
        Ok(Arc::new(encoder))
    }
}

impl EmbeddingBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn load(&self, key: &ModelKey) -> Result<Arc<dyn EncoderModel>> {
        self.open(&self.command, &key.model_name)
    }

    fn reload(&self, dir: &Path) -> Result<Arc<dyn EncoderModel>> {
        let manifest = ModelManifest::read(dir)?;
        manifest.expect_backend(self.name())?;
        let command = manifest.command.as_deref().unwrap_or(&self.command);
        self.open(command, &manifest.model_name)
    }
}

/// A model served by an external command.
pub struct CommandEncoder {
    command: String,
    model: String,
    dimension: usize,
}

impl CommandEncoder {
    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload_str = payload.to_string();
            stdin
                .write_all(payload_str.as_bytes())
                .context("Failed to write embeddings payload to stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let vectors = parse_command_output(stdout.trim())?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedding command returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

impl EncoderModel for CommandEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.run_command(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn encode_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_command(texts)
    }

    fn persist(&self, dir: &Path) -> Result<()> {
        ModelManifest {
            backend: "command".to_string(),
            model_name: self.model.clone(),
            dimension: self.dimension,
            cache_dir: None,
            command: Some(self.command.clone()),
        }
        .write(dir)
    }
}

fn parse_command_output(stdout: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(stdout)
        .with_context(|| "Failed to parse embeddings command output as JSON")?;

    let embeddings_value = match parsed {
        Value::Array(arr) => Value::Array(arr),
        Value::Object(ref obj) => {
            if let Some(value) = obj.get("embeddings") {
                value.clone()
            } else if let Some(value) = obj.get("vectors") {
                value.clone()
            } else if let Some(value) = obj.get("data") {
                value.clone()
            } else {
                bail!("Embeddings command output missing 'embeddings' field");
            }
        }
        _ => bail!("Embeddings command output must be JSON array or object"),
    };

    embeddings_value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Embeddings output must be a JSON array"))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                        .map(|v| v as f32)
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}

/// Deterministic feature-hashing backend.
///
/// Tokens and token bigrams are hashed into a fixed number of buckets. No
/// model files are needed, which makes it useful offline and in tests.
#[derive(Debug, Clone)]
pub struct HashingBackend {
    dimension: usize,
    batch: bool,
}

impl HashingBackend {
    /// Creates a backend producing vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch: true,
        }
    }

    /// Disables the batch entry point so callers fall back to single encodes.
    pub fn without_batch(mut self) -> Self {
        self.batch = false;
        self
    }
}

impl EmbeddingBackend for HashingBackend {
    fn name(&self) -> &str {
        "hashing"
    }

    fn load(&self, key: &ModelKey) -> Result<Arc<dyn EncoderModel>> {
        if self.dimension == 0 {
            bail!("Hashing backend dimension must be greater than 0");
        }
        Ok(Arc::new(HashingEncoder {
            model: key.model_name.clone(),
            dimension: self.dimension,
            batch: self.batch,
        }))
    }

    fn reload(&self, dir: &Path) -> Result<Arc<dyn EncoderModel>> {
        let manifest = ModelManifest::read(dir)?;
        manifest.expect_backend(self.name())?;
        if manifest.dimension == 0 {
            bail!("Manifest in {} has dimension 0", dir.display());
        }
        Ok(Arc::new(HashingEncoder {
            model: manifest.model_name,
            dimension: manifest.dimension,
            batch: self.batch,
        }))
    }
}

/// Encoder behind [`HashingBackend`].
pub struct HashingEncoder {
    model: String,
    dimension: usize,
    batch: bool,
}

impl HashingEncoder {
    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.model.as_bytes());
        hasher.update(&[0]);
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();

        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
}

impl EncoderModel for HashingEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let tokens: Vec<&str> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|token| !token.is_empty())
            .collect();

        let mut vector = vec![0.0; self.dimension];
        for token in &tokens {
            self.add_feature(&mut vector, token);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn persist(&self, dir: &Path) -> Result<()> {
        ModelManifest {
            backend: "hashing".to_string(),
            model_name: self.model.clone(),
            dimension: self.dimension,
            cache_dir: None,
            command: None,
        }
        .write(dir)
    }
}

fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

pub(crate) fn parse_usize_env(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid {} value: {}", name, value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

pub(crate) fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim().to_lowercase();
            if value.is_empty() {
                return Ok(default);
            }
            match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => bail!("Invalid {} value: {}", name, other),
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}
