//! Text-to-vector embedding layer.
//!
//! [`EmbeddingProvider`] is the black-box encoder and [`ModelLoader`] produces one
//! from a model name. [`EmbeddingModel`] wraps a loader with load-once state, and
//! [`registry::SharedModelRegistry`] hands the same loaded model to every component
//! that asks for it by name.

pub mod hashing;
pub mod local;
pub mod registry;

use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;

use crate::error::{RagError, RagResult};

/// Model used when the configuration does not name one.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Trait for embedding text into vectors.
///
/// Embedding is synchronous and may block; the CLI runs it on
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Produces a ready [`EmbeddingProvider`] for a model name. Loading may be slow.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_name: &str) -> Result<Box<dyn EmbeddingProvider>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&str) -> Result<Box<dyn EmbeddingProvider>> + Send + Sync,
{
    fn load(&self, model_name: &str) -> Result<Box<dyn EmbeddingProvider>> {
        self(model_name)
    }
}

/// Create a model loader from config.
///
/// `"local"` uses ONNX Runtime with model files under `cache_dir` (run
/// `ragmem model download` first); `"hashing"` needs no files.
pub fn create_loader(config: &crate::config::EmbeddingConfig) -> Result<Arc<dyn ModelLoader>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(local::LocalModelLoader::new(
            crate::config::expand_tilde(&config.cache_dir),
        ))),
        "hashing" => Ok(Arc::new(hashing::HashingModelLoader::default())),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, hashing"),
    }
}

/// A named embedding model with load-once semantics.
///
/// [`try_load`](Self::try_load) runs the loader at most once per successful load;
/// concurrent callers wait on the load guard and then see the loaded provider.
/// A failed load leaves the model unloaded so a later call retries from scratch.
pub struct EmbeddingModel {
    name: String,
    loader: Arc<dyn ModelLoader>,
    provider: OnceLock<Box<dyn EmbeddingProvider>>,
    load_guard: Mutex<()>,
}

impl EmbeddingModel {
    pub fn new(name: impl Into<String>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            name: name.into(),
            loader,
            provider: OnceLock::new(),
            load_guard: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.provider.get().is_some()
    }

    /// Output dimensionality, known once the model is loaded.
    pub fn dimensions(&self) -> Option<usize> {
        self.provider.get().map(|p| p.dimensions())
    }

    /// Load the model, returning `false` on failure.
    pub fn load(&self) -> bool {
        match self.try_load() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(model = %self.name, error = %e, "embedding model load failed");
                false
            }
        }
    }

    /// Load the model if it is not loaded yet.
    pub fn try_load(&self) -> RagResult<()> {
        if self.is_loaded() {
            return Ok(());
        }

        let _guard = self.load_guard.lock().map_err(|_| RagError::ModelLoad {
            model: self.name.clone(),
            reason: "load guard poisoned".into(),
        })?;

        // Another caller may have finished loading while we waited.
        if self.is_loaded() {
            return Ok(());
        }

        tracing::info!(model = %self.name, "loading embedding model");
        let provider = self.loader.load(&self.name).map_err(|e| RagError::ModelLoad {
            model: self.name.clone(),
            reason: format!("{e:#}"),
        })?;
        let dimensions = provider.dimensions();
        // Only one thread can be inside the guard, so the cell is still empty.
        let _ = self.provider.set(provider);
        tracing::info!(model = %self.name, dimensions, "embedding model loaded");
        Ok(())
    }

    /// Embed one text. Fails with [`RagError::NotLoaded`] before a successful load,
    /// and with [`RagError::EmbeddingFailure`] on backend errors or unusable vectors.
    pub fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let provider = self.provider.get().ok_or(RagError::NotLoaded)?;
        let vector = provider
            .embed(text)
            .map_err(|e| RagError::EmbeddingFailure(format!("{e:#}")))?;
        check_vector(&vector)?;
        Ok(vector)
    }
}

impl std::fmt::Debug for EmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingModel")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn check_vector(vector: &[f32]) -> RagResult<()> {
    if vector.is_empty() {
        return Err(RagError::EmbeddingFailure(
            "backend returned an empty vector".into(),
        ));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(RagError::EmbeddingFailure(
            "backend returned a non-finite component".into(),
        ));
    }
    Ok(())
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
