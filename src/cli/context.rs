use anyhow::Result;
use ragmem::config::RagConfig;
use ragmem::pipeline::create_conversation_manager;
use ragmem::{Role, SharedModelRegistry};
use std::sync::Arc;

/// Record one conversation turn and print its id.
pub async fn add_turn(
    config: RagConfig,
    role: Role,
    text: String,
    conversation: Option<String>,
) -> Result<()> {
    let registry = Arc::new(SharedModelRegistry::from_config(&config.embedding)?);
    let manager = create_conversation_manager(&config, registry, None);

    let id = tokio::task::spawn_blocking(move || {
        manager.try_add_turn(role, &text, conversation.as_deref())
    })
    .await??;

    println!("{id}");
    Ok(())
}

/// Print the turns most relevant to a query.
pub async fn query(config: RagConfig, query: String, k: Option<usize>) -> Result<()> {
    let registry = Arc::new(SharedModelRegistry::from_config(&config.embedding)?);
    let k = k.unwrap_or(config.retrieval.default_k);
    let manager = create_conversation_manager(&config, registry, None);

    let matches =
        tokio::task::spawn_blocking(move || manager.try_get_relevant_context(&query, k)).await??;

    super::print_matches(&matches);
    Ok(())
}
