use anyhow::Result;
use ragmem::config::RagConfig;
use ragmem::VectorStore;

/// Display collection statistics in the terminal.
pub fn stats(config: &RagConfig) -> Result<()> {
    let store = VectorStore::new(config.resolved_storage_path());
    store.try_init_client()?;
    let collections = store.list_collections()?;

    println!("Vector Store Statistics");
    println!("{}", "=".repeat(40));
    println!("  Storage:             {}", store.db_path().display());
    println!("  Collections:         {}", collections.len());
    println!();

    if collections.is_empty() {
        println!("No collections yet.");
        return Ok(());
    }

    println!("  {:<24} {:>8} {:>10}", "name", "records", "dimension");
    for c in &collections {
        let dimension = c
            .dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into());
        println!("  {:<24} {:>8} {:>10}", c.name, c.count, dimension);
    }

    Ok(())
}
