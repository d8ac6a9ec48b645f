use anyhow::{Context, Result};
use ragmem::config::RagConfig;
use ragmem::{Metadata, Pipeline, SharedModelRegistry};
use std::path::PathBuf;
use std::sync::Arc;

/// Ingest texts from arguments and/or a file and print the batch summary.
pub async fn ingest(
    config: RagConfig,
    mut texts: Vec<String>,
    file: Option<PathBuf>,
    collection: Option<String>,
    metadata: Option<String>,
) -> Result<()> {
    if let Some(path) = file {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        texts.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
    }
    anyhow::ensure!(!texts.is_empty(), "nothing to ingest: pass texts or --file");

    let metadata: Option<Metadata> = metadata
        .map(|raw| serde_json::from_str(&raw).context("--metadata must be a JSON object"))
        .transpose()?;

    let registry = Arc::new(SharedModelRegistry::from_config(&config.embedding)?);
    let collection = collection.unwrap_or_else(|| config.collections.inputs.clone());
    let pipeline = Pipeline::new(
        collection,
        config.resolved_storage_path(),
        config.embedding.model.clone(),
        registry,
    );

    let report = tokio::task::spawn_blocking(move || {
        let metadata_list = metadata.map(|m| vec![m; texts.len()]);
        pipeline.run_batch_report(&texts, metadata_list.as_deref())
    })
    .await?;

    println!("{report}");
    anyhow::ensure!(report.succeeded > 0, "no inputs were stored");
    Ok(())
}
