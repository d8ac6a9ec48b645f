//! Ingestion and similarity search over one collection.
//!
//! [`InputProcessor`] binds one [`EmbeddingModel`] to one collection of a
//! [`VectorStore`]. Every public operation has a `try_*` twin returning the
//! failure reason; the plain versions log it and return `false`, `0` or `[]`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;

use crate::embedding::registry::SharedModelRegistry;
use crate::embedding::{EmbeddingModel, ModelLoader};
use crate::error::{RagError, RagResult};
use crate::ids;
use crate::store::{Metadata, SearchMatch, StoredRecord, VectorStore};

/// `type` recorded for generic inputs.
pub const INPUT_TYPE: &str = "user_input";

pub struct InputProcessor {
    collection_name: String,
    model: Arc<EmbeddingModel>,
    store: VectorStore,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
}

impl InputProcessor {
    /// Bind `model` (owned or shared) to `collection_name` under `persist_dir`.
    /// A model that is already loaded is not loaded again.
    pub fn new(
        collection_name: impl Into<String>,
        persist_dir: impl Into<PathBuf>,
        model: Arc<EmbeddingModel>,
    ) -> Self {
        Self {
            collection_name: collection_name.into(),
            model,
            store: VectorStore::new(persist_dir),
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
        }
    }

    /// Processor with its own, unshared model instance.
    pub fn with_loader(
        collection_name: impl Into<String>,
        persist_dir: impl Into<PathBuf>,
        model_name: &str,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self::new(
            collection_name,
            persist_dir,
            Arc::new(EmbeddingModel::new(model_name, loader)),
        )
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn model(&self) -> &Arc<EmbeddingModel> {
        &self.model
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn initialize(&self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(collection = %self.collection_name, error = %e, "input processor initialization failed");
                false
            }
        }
    }

    /// Load the model, connect the store, and bind the collection, in that order.
    /// Returns immediately once initialized. A failing step leaves the processor
    /// uninitialized so the next call starts over.
    pub fn try_initialize(&self) -> RagResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let _guard = self
            .init_guard
            .lock()
            .map_err(|_| RagError::NotInitialized("initialization guard poisoned"))?;
        if self.is_initialized() {
            return Ok(());
        }

        self.model.try_load()?;
        self.store.try_init_client()?;
        self.store.get_or_create_collection(&self.collection_name)?;

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            collection = %self.collection_name,
            model = %self.model.name(),
            "input processor initialized"
        );
        Ok(())
    }

    pub fn process_single(&self, text: &str, metadata: Option<&Metadata>) -> bool {
        match self.try_process_single(text, metadata) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(collection = %self.collection_name, error = %e, "failed to process input");
                false
            }
        }
    }

    /// Embed and store one text, returning its new id. Caller metadata is merged
    /// over the system keys (`timestamp`, `type`), so callers may override them.
    pub fn try_process_single(&self, text: &str, metadata: Option<&Metadata>) -> RagResult<String> {
        self.try_initialize()?;

        let embedding = self.model.embed(text)?;
        let id = ids::input_id();

        let mut final_metadata = system_metadata(INPUT_TYPE);
        if let Some(extra) = metadata {
            final_metadata.extend(extra.clone());
        }

        self.write(&id, text, embedding, final_metadata)?;
        Ok(id)
    }

    /// Store each text independently; one failure does not stop the rest.
    /// `metadata_list` is matched by position and may be shorter than `texts`.
    /// Returns how many texts were stored.
    pub fn process_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        metadata_list: Option<&[Metadata]>,
    ) -> usize {
        if !self.initialize() {
            return 0;
        }

        let mut succeeded = 0;
        for (i, text) in texts.iter().enumerate() {
            let metadata = metadata_list.and_then(|list| list.get(i));
            if self.process_single(text.as_ref(), metadata) {
                succeeded += 1;
            }
        }

        tracing::debug!(
            collection = %self.collection_name,
            total = texts.len(),
            succeeded,
            "batch processed"
        );
        succeeded
    }

    pub fn search_similar(&self, query: &str, k: usize) -> Vec<SearchMatch> {
        self.try_search_similar(query, k).unwrap_or_else(|e| {
            tracing::warn!(collection = %self.collection_name, error = %e, "similarity search failed");
            Vec::new()
        })
    }

    /// Up to `k` stored inputs closest to `query`, nearest first.
    pub fn try_search_similar(&self, query: &str, k: usize) -> RagResult<Vec<SearchMatch>> {
        self.try_initialize()?;
        let embedding = self.model.embed(query)?;
        Ok(self.store.try_query(&embedding, k)?.into_matches())
    }

    /// Number of records in the collection.
    pub fn count(&self) -> RagResult<usize> {
        self.try_initialize()?;
        self.store.count()
    }

    /// Fetch stored records by id.
    pub fn get(&self, ids: &[String]) -> RagResult<Vec<StoredRecord>> {
        self.try_initialize()?;
        self.store.get(ids)
    }

    /// Write one fully-formed record. The parallel sequences are built here, per
    /// call, so concurrent writers never share them.
    pub(crate) fn write(
        &self,
        id: &str,
        text: &str,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> RagResult<()> {
        self.store.try_upsert(
            &[id.to_string()],
            &[text.to_string()],
            &[embedding],
            Some(&[metadata]),
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for InputProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputProcessor")
            .field("collection", &self.collection_name)
            .field("model", &self.model)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// System-reserved metadata stamped on every record.
pub(crate) fn system_metadata(record_type: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "timestamp".into(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    metadata.insert("type".into(), Value::String(record_type.into()));
    metadata
}

/// An [`InputProcessor`] built on first use around a model from the shared
/// registry. The processor is stored only after it initialized successfully.
pub(crate) struct SharedProcessor {
    registry: Arc<SharedModelRegistry>,
    model_name: String,
    collection_name: String,
    persist_dir: PathBuf,
    processor: OnceLock<InputProcessor>,
    init_guard: Mutex<()>,
}

impl SharedProcessor {
    pub(crate) fn new(
        registry: Arc<SharedModelRegistry>,
        model_name: String,
        collection_name: String,
        persist_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            model_name,
            collection_name,
            persist_dir,
            processor: OnceLock::new(),
            init_guard: Mutex::new(()),
        }
    }

    pub(crate) fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub(crate) fn get(&self) -> Option<&InputProcessor> {
        self.processor.get()
    }

    /// Acquire the shared model first, then build and initialize the processor
    /// with it; the processor's own load step is then a no-op.
    pub(crate) fn try_get(&self) -> RagResult<&InputProcessor> {
        if let Some(processor) = self.processor.get() {
            return Ok(processor);
        }

        let _guard = self
            .init_guard
            .lock()
            .map_err(|_| RagError::NotInitialized("initialization guard poisoned"))?;
        if let Some(processor) = self.processor.get() {
            return Ok(processor);
        }

        let model = self.registry.try_get_model(&self.model_name)?;
        let processor = InputProcessor::new(
            self.collection_name.clone(),
            self.persist_dir.clone(),
            model,
        );
        processor.try_initialize()?;
        Ok(self.processor.get_or_init(|| processor))
    }
}
