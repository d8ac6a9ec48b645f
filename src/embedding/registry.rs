//! Process-wide cache of loaded embedding models.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{create_loader, EmbeddingModel, ModelLoader};
use crate::config::EmbeddingConfig;
use crate::error::{RagError, RagResult};

/// Loads each model name once and hands the same [`EmbeddingModel`] to every caller.
///
/// Share one registry (behind an `Arc`) between all components of a process. The
/// cache is keyed by model name, so asking for a second name loads a second model
/// instead of silently returning the first.
///
/// The map lock only guards the name-to-slot lookup. Loading happens outside it,
/// serialized per name by the model's own load guard: concurrent first callers
/// for one name wait on that load and receive the same instance, while callers
/// for other names are not held up. A failed load leaves the slot unloaded and
/// the next call retries.
pub struct SharedModelRegistry {
    loader: Arc<dyn ModelLoader>,
    models: Mutex<HashMap<String, Arc<EmbeddingModel>>>,
}

impl SharedModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry around the loader named in config.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(create_loader(config)?))
    }

    /// Return the loaded model for `name`, or `None` if it could not be loaded.
    pub fn get_model(&self, name: &str) -> Option<Arc<EmbeddingModel>> {
        match self.try_get_model(name) {
            Ok(model) => Some(model),
            Err(e) => {
                tracing::warn!(model = %name, error = %e, "shared embedding model unavailable");
                None
            }
        }
    }

    pub fn try_get_model(&self, name: &str) -> RagResult<Arc<EmbeddingModel>> {
        let model = {
            let mut models = self.models.lock().map_err(|_| RagError::ModelLoad {
                model: name.to_string(),
                reason: "model registry lock poisoned".into(),
            })?;
            Arc::clone(
                models
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(EmbeddingModel::new(name, Arc::clone(&self.loader)))),
            )
        };

        if model.is_loaded() {
            tracing::debug!(model = %name, "using existing shared embedding model");
            return Ok(model);
        }

        model.try_load()?;
        tracing::info!(model = %name, "shared embedding model cached");
        Ok(model)
    }

    /// Names of the models loaded so far.
    pub fn loaded_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .lock()
            .map(|m| {
                m.iter()
                    .filter(|(_, model)| model.is_loaded())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl std::fmt::Debug for SharedModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedModelRegistry")
            .field("models", &self.loaded_models())
            .finish()
    }
}
