use anyhow::Result;
use ragmem::config::RagConfig;
use ragmem::{InputProcessor, SharedModelRegistry};

/// Run a similarity search from the terminal.
pub async fn search(
    config: RagConfig,
    query: String,
    k: Option<usize>,
    collection: Option<String>,
) -> Result<()> {
    let registry = SharedModelRegistry::from_config(&config.embedding)?;
    let k = k.unwrap_or(config.retrieval.default_k);
    let collection = collection.unwrap_or_else(|| config.collections.inputs.clone());

    // Embedding blocks; keep it off the async runtime.
    let matches = tokio::task::spawn_blocking(move || -> Result<_> {
        let model = registry.try_get_model(&config.embedding.model)?;
        let processor = InputProcessor::new(collection, config.resolved_storage_path(), model);
        Ok(processor.try_search_similar(&query, k)?)
    })
    .await??;

    super::print_matches(&matches);
    Ok(())
}
