//! Top-level ingestion pipeline and convenience entry points.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::RagConfig;
use crate::conversation::ConversationContextManager;
use crate::embedding::registry::SharedModelRegistry;
use crate::error::RagResult;
use crate::processor::{InputProcessor, SharedProcessor};
use crate::store::{Metadata, SearchMatch};

/// Outcome of one [`Pipeline::run_batch_report`] call.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    /// Wall-clock time per input, `None` for an empty batch.
    pub fn average_per_item(&self) -> Option<Duration> {
        u32::try_from(self.total)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.elapsed / n)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{rule}")?;
        writeln!(f, "EXECUTION SUMMARY:")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total inputs processed: {}", self.total)?;
        writeln!(f, "Embeddings generated: {}", self.succeeded)?;
        writeln!(f, "Total execution time: {:.4} seconds", self.elapsed.as_secs_f64())?;
        if let Some(avg) = self.average_per_item() {
            writeln!(f, "Average time per input: {:.4} seconds", avg.as_secs_f64())?;
        }
        write!(f, "{rule}")
    }
}

/// Ingestion façade over the shared model registry and one [`InputProcessor`].
pub struct Pipeline {
    inner: SharedProcessor,
}

impl Pipeline {
    pub fn new(
        collection_name: impl Into<String>,
        persist_dir: impl Into<PathBuf>,
        model_name: impl Into<String>,
        registry: Arc<SharedModelRegistry>,
    ) -> Self {
        Self {
            inner: SharedProcessor::new(
                registry,
                model_name.into(),
                collection_name.into(),
                persist_dir.into(),
            ),
        }
    }

    /// Pipeline over the configured pipeline collection.
    pub fn from_config(config: &RagConfig, registry: Arc<SharedModelRegistry>) -> Self {
        Self::new(
            config.collections.pipeline.clone(),
            config.resolved_storage_path(),
            config.embedding.model.clone(),
            registry,
        )
    }

    pub fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    /// The bound processor, once initialized.
    pub fn processor(&self) -> Option<&InputProcessor> {
        self.inner.get()
    }

    pub fn initialize(&self) -> bool {
        match self.try_initialize() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(collection = %self.collection_name(), error = %e, "pipeline initialization failed");
                false
            }
        }
    }

    /// Get the shared model, then initialize the processor with it.
    pub fn try_initialize(&self) -> RagResult<&InputProcessor> {
        self.inner.try_get()
    }

    /// Ingest `texts`; `true` if at least one was stored.
    pub fn run_batch<S: AsRef<str>>(&self, texts: &[S], metadata_list: Option<&[Metadata]>) -> bool {
        self.run_batch_report(texts, metadata_list).succeeded > 0
    }

    /// Ingest `texts` and report counts and timing.
    pub fn run_batch_report<S: AsRef<str>>(
        &self,
        texts: &[S],
        metadata_list: Option<&[Metadata]>,
    ) -> BatchReport {
        tracing::info!(
            collection = %self.collection_name(),
            total = texts.len(),
            "starting embedding generation"
        );
        let start = Instant::now();

        let succeeded = match self.try_initialize() {
            Ok(processor) => processor.process_batch(texts, metadata_list),
            Err(e) => {
                tracing::warn!(error = %e, "pipeline not initialized; nothing ingested");
                0
            }
        };

        let report = BatchReport {
            total: texts.len(),
            succeeded,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            collection = %self.collection_name(),
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed(),
            elapsed_secs = report.elapsed.as_secs_f64(),
            avg_secs = report.average_per_item().map(|d| d.as_secs_f64()),
            "batch complete"
        );
        report
    }

    pub fn add_single_input(&self, text: &str, metadata: Option<&Metadata>) -> bool {
        match self.try_initialize() {
            Ok(processor) => processor.process_single(text, metadata),
            Err(e) => {
                tracing::warn!(error = %e, "pipeline not initialized");
                false
            }
        }
    }

    pub fn search_similar(&self, query: &str, k: usize) -> Vec<SearchMatch> {
        match self.try_initialize() {
            Ok(processor) => processor.search_similar(query, k),
            Err(e) => {
                tracing::warn!(error = %e, "pipeline not initialized");
                Vec::new()
            }
        }
    }

    pub fn count(&self) -> RagResult<usize> {
        self.try_initialize()?.count()
    }
}

fn inputs_pipeline(
    config: &RagConfig,
    registry: Arc<SharedModelRegistry>,
    collection_name: Option<&str>,
) -> Pipeline {
    Pipeline::new(
        collection_name.unwrap_or(config.collections.inputs.as_str()),
        config.resolved_storage_path(),
        config.embedding.model.clone(),
        registry,
    )
}

/// Ingest `texts` into `collection_name`, or the configured inputs collection.
pub fn process_user_inputs<S: AsRef<str>>(
    config: &RagConfig,
    registry: Arc<SharedModelRegistry>,
    texts: &[S],
    metadata_list: Option<&[Metadata]>,
    collection_name: Option<&str>,
) -> bool {
    inputs_pipeline(config, registry, collection_name).run_batch(texts, metadata_list)
}

/// Store one text in `collection_name`, or the configured inputs collection.
pub fn add_single_user_input(
    config: &RagConfig,
    registry: Arc<SharedModelRegistry>,
    text: &str,
    metadata: Option<&Metadata>,
    collection_name: Option<&str>,
) -> bool {
    inputs_pipeline(config, registry, collection_name).add_single_input(text, metadata)
}

/// Search `collection_name`, or the configured inputs collection.
pub fn search_similar_texts(
    config: &RagConfig,
    registry: Arc<SharedModelRegistry>,
    query: &str,
    k: usize,
    collection_name: Option<&str>,
) -> Vec<SearchMatch> {
    inputs_pipeline(config, registry, collection_name).search_similar(query, k)
}

/// Conversation manager over `collection_name`, or the configured
/// conversation collection.
pub fn create_conversation_manager(
    config: &RagConfig,
    registry: Arc<SharedModelRegistry>,
    collection_name: Option<&str>,
) -> ConversationContextManager {
    match collection_name {
        Some(name) => ConversationContextManager::new(
            name,
            config.resolved_storage_path(),
            config.embedding.model.clone(),
            registry,
        ),
        None => ConversationContextManager::from_config(config, registry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_has_no_average() {
        let report = BatchReport {
            total: 0,
            succeeded: 0,
            elapsed: Duration::from_millis(3),
        };
        assert!(report.average_per_item().is_none());
        assert!(!report.to_string().contains("Average"));
    }

    #[test]
    fn report_summarizes_counts() {
        let report = BatchReport {
            total: 4,
            succeeded: 3,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(report.failed(), 1);
        assert_eq!(report.average_per_item(), Some(Duration::from_millis(500)));
        let text = report.to_string();
        assert!(text.contains("Total inputs processed: 4"));
        assert!(text.contains("Embeddings generated: 3"));
        assert!(text.contains("Average time per input: 0.5000 seconds"));
    }
}
