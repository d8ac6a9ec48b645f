//! Local ONNX Runtime embedding provider.
//!
//! Loads a sentence-transformer export (`model.onnx` + `tokenizer.json`) from the
//! model cache via `ort`. Handles tokenization, inference, mean pooling, and L2
//! normalization. The output dimension is read from the model on load.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, ModelLoader};

/// Maximum sequence length fed to the model.
const MAX_SEQ_LEN: usize = 256;

/// Directory under the cache holding one model's files.
///
/// `"all-MiniLM-L6-v2"` maps to `<cache>/all-MiniLM-L6-v2`, and a repo id such
/// as `"BAAI/bge-small-en-v1.5"` maps to `<cache>/BAAI--bge-small-en-v1.5`.
pub fn model_dir(cache_dir: &Path, model_name: &str) -> PathBuf {
    cache_dir.join(model_name.replace('/', "--"))
}

/// Loads [`LocalEmbeddingProvider`]s from a model cache directory.
pub struct LocalModelLoader {
    cache_dir: PathBuf,
}

impl LocalModelLoader {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }
}

impl ModelLoader for LocalModelLoader {
    fn load(&self, model_name: &str) -> Result<Box<dyn EmbeddingProvider>> {
        let provider = LocalEmbeddingProvider::new(&model_dir(&self.cache_dir, model_name))?;
        Ok(Box::new(provider))
    }
}

/// Local ONNX-based sentence embedding provider.
pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    pub fn new(dir: &Path) -> Result<Self> {
        let model_path = dir.join("model.onnx");
        let tokenizer_path = dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `ragmem model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `ragmem model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        let mut provider = Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions: 0,
        };

        // The hidden size is only visible on the output tensor.
        let probe = provider.run(&["dimension probe"])?;
        provider.dimensions = probe.first().map(Vec::len).unwrap_or(0);
        anyhow::ensure!(provider.dimensions > 0, "model produced empty embeddings");

        tracing::info!(dimensions = provider.dimensions, "embedding provider ready");
        Ok(provider)
    }

    fn run(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor =
            Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))?;
        // token_type_ids: all zeros (single sentence, no segment B)
        let token_type_ids = vec![0i64; batch_size * seq_len];
        let token_type_ids_tensor =
            Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
            "token_type_ids" => token_type_ids_tensor,
        })?;

        // The output name varies by ONNX export. Try common names, fall back to index 0.
        let token_emb_value = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .context("failed to extract token_embeddings tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] as usize == batch_size,
            "unexpected token_embeddings shape: {dims:?}, expected [batch, seq, hidden]"
        );
        if self.dimensions > 0 {
            anyhow::ensure!(
                dims[2] as usize == self.dimensions,
                "hidden size changed: {} != {}",
                dims[2],
                self.dimensions
            );
        }
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        Ok((0..batch_size)
            .map(|b| {
                mean_pool(
                    &data[b * actual_seq_len * hidden_dim..(b + 1) * actual_seq_len * hidden_dim],
                    &attention_mask_flat[b * seq_len..(b + 1) * seq_len],
                    hidden_dim,
                )
            })
            .map(|pooled| l2_normalize(&pooled))
            .collect())
    }
}

/// Average the token rows whose attention mask is set.
fn mean_pool(tokens: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (row, &m) in tokens.chunks_exact(hidden_dim).zip(mask) {
        if m > 0 {
            for (acc, x) in sum.iter_mut().zip(row) {
                *acc += x;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        sum.iter_mut().for_each(|x| *x /= count);
    }
    sum
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run(&[text])?
            .into_iter()
            .next()
            .context("model returned no embedding")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.run(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_skips_masked_tokens() {
        let tokens = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let pooled = mean_pool(&tokens, &[1, 1, 0], 2);
        assert_eq!(pooled, vec![2.0, 3.0]);
    }

    #[test]
    fn test_mean_pool_all_masked() {
        let pooled = mean_pool(&[1.0, 2.0], &[0], 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn test_model_dir_maps_repo_ids() {
        let cache = Path::new("/cache");
        assert_eq!(
            model_dir(cache, "all-MiniLM-L6-v2"),
            PathBuf::from("/cache/all-MiniLM-L6-v2")
        );
        assert_eq!(
            model_dir(cache, "BAAI/bge-small-en-v1.5"),
            PathBuf::from("/cache/BAAI--bge-small-en-v1.5")
        );
    }

    #[test]
    fn test_missing_model_files_fail_to_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let loader = LocalModelLoader::new(tmp.path().to_path_buf());
        let err = loader.load("all-MiniLM-L6-v2").err().expect("no model files");
        assert!(err.to_string().contains("model download"));
    }

    fn installed_dir() -> PathBuf {
        model_dir(
            &crate::config::default_ragmem_dir().join("models"),
            super::super::DEFAULT_MODEL,
        )
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (norm_a * norm_b)
    }

    #[test]
    #[ignore] // needs `ragmem model download`
    fn test_embed_is_l2_normalized() {
        let provider = LocalEmbeddingProvider::new(&installed_dir()).unwrap();
        let embedding = provider.embed("Test sentence for normalization").unwrap();
        assert_eq!(embedding.len(), provider.dimensions());
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "L2 norm should be ~1.0, got {norm}");
    }

    #[test]
    #[ignore]
    fn test_embed_batch_matches_single() {
        let provider = LocalEmbeddingProvider::new(&installed_dir()).unwrap();
        let batch = provider.embed_batch(&["First sentence", "Second one"]).unwrap();
        assert_eq!(batch.len(), 2);
        let single = provider.embed("First sentence").unwrap();
        assert!(cosine_similarity(&batch[0], &single) > 0.999);
    }

    #[test]
    #[ignore]
    fn test_similar_texts_have_high_cosine_similarity() {
        let provider = LocalEmbeddingProvider::new(&installed_dir()).unwrap();
        let emb1 = provider.embed("the cat sat").unwrap();
        let emb2 = provider.embed("a cat is sitting").unwrap();
        let emb3 = provider.embed("quantum computing basics").unwrap();
        assert!(cosine_similarity(&emb1, &emb2) > cosine_similarity(&emb1, &emb3));
    }
}
