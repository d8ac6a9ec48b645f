pub mod context;
pub mod ingest;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use ragmem::config::{expand_tilde, EmbeddingConfig};
use ragmem::embedding::local::model_dir;
use ragmem::SearchMatch;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Hugging Face repo for a model name. Bare names are sentence-transformers models.
fn model_repo(model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("sentence-transformers/{model}")
    }
}

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    if config.provider != "local" {
        println!(
            "Provider \"{}\" needs no model files. Nothing to download.",
            config.provider
        );
        return Ok(());
    }

    let dir = model_dir(&expand_tilde(&config.cache_dir), &config.model);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;

    let repo = model_repo(&config.model);
    let files = [
        ("model.onnx", format!("https://huggingface.co/{repo}/resolve/main/onnx/model.onnx")),
        ("tokenizer.json", format!("https://huggingface.co/{repo}/resolve/main/tokenizer.json")),
    ];

    for (name, url) in &files {
        let dest = dir.join(name);
        if dest.exists() {
            println!("{name} already exists at {}", dest.display());
        } else {
            println!("Downloading {name} from {repo}...");
            download_file(url, &dest).await?;
            println!("{name} saved to {}", dest.display());
        }
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    write_chunks(response.bytes_stream(), &mut file, &pb).await?;

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

/// Copy a byte stream into `out` chunk by chunk, advancing `pb` as each chunk
/// lands. Returns the number of bytes written.
async fn write_chunks<S, B, E, W>(stream: S, out: &mut W, pb: &ProgressBar) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error reading response")?;
        let bytes = chunk.as_ref();
        out.write_all(bytes).await.context("error writing to file")?;
        written += bytes.len() as u64;
        pb.inc(bytes.len() as u64);
    }
    Ok(written)
}

/// Print ranked matches the way `search` and `context query` show them.
pub fn print_matches(matches: &[SearchMatch]) {
    if matches.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Found {} result(s)\n", matches.len());
    for (i, m) in matches.iter().enumerate() {
        let preview = if m.text.chars().count() > 120 {
            format!("{}...", m.text.chars().take(120).collect::<String>())
        } else {
            m.text.clone()
        };
        let kind = m.metadata.get("type").and_then(|v| v.as_str()).unwrap_or("-");

        println!("  {}. [{}] {} (distance: {:.4})", i + 1, kind, m.id, m.distance);
        println!("     {}", preview);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_model_names_map_to_sentence_transformers() {
        assert_eq!(
            model_repo("all-MiniLM-L6-v2"),
            "sentence-transformers/all-MiniLM-L6-v2"
        );
        assert_eq!(model_repo("BAAI/bge-small-en-v1.5"), "BAAI/bge-small-en-v1.5");
    }

    #[tokio::test]
    async fn chunks_are_written_in_order_and_counted() {
        let chunks: Vec<std::io::Result<Vec<u8>>> =
            vec![Ok(b"onnx".to_vec()), Ok(b"-".to_vec()), Ok(b"weights".to_vec())];
        let pb = ProgressBar::hidden();
        let mut out = Vec::new();

        let written = write_chunks(futures_util::stream::iter(chunks), &mut out, &pb)
            .await
            .unwrap();

        assert_eq!(written, 12);
        assert_eq!(out, b"onnx-weights");
        assert_eq!(pb.position(), 12);
    }

    #[tokio::test]
    async fn stream_error_stops_the_copy() {
        let chunks: Vec<std::io::Result<Vec<u8>>> = vec![
            Ok(b"partial".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"never".to_vec()),
        ];
        let pb = ProgressBar::hidden();
        let mut out = Vec::new();

        let err = write_chunks(futures_util::stream::iter(chunks), &mut out, &pb)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("error reading response"));
        assert_eq!(out, b"partial");
    }
}
