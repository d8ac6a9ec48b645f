#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ragmem::{EmbeddingProvider, Metadata, ModelLoader, SharedModelRegistry};

/// Concept axes of [`ConceptProvider`].
const ANIMAL: usize = 0;
const FELINE: usize = 1;
const CANINE: usize = 2;
const POSTURE: usize = 3;
const MOTION: usize = 4;
const TECH: usize = 5;
const SCIENCE: usize = 6;
const OTHER: usize = 7;
pub const CONCEPT_DIM: usize = 8;

/// Deterministic "semantic" embedder over a tiny lexicon.
///
/// Known words add weight to concept axes; a text with no known words lands on
/// the OTHER axis plus a per-length offset so distinct texts stay distinct. Any
/// text containing `FAIL` makes `embed` return an error.
pub struct ConceptProvider;

impl ConceptProvider {
    fn axes(word: &str) -> &'static [(usize, f32)] {
        match word {
            "cat" | "cats" | "kitten" => &[(ANIMAL, 1.0), (FELINE, 1.0)],
            "dog" | "dogs" | "puppy" => &[(ANIMAL, 1.0), (CANINE, 1.0)],
            "sat" | "sit" | "sits" | "sitting" => &[(POSTURE, 1.0)],
            "ran" | "run" | "runs" | "running" => &[(MOTION, 1.0)],
            "computing" | "computer" | "software" => &[(TECH, 1.0)],
            "quantum" | "physics" => &[(SCIENCE, 1.0), (TECH, 0.5)],
            _ => &[],
        }
    }
}

impl EmbeddingProvider for ConceptProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        anyhow::ensure!(!text.contains("FAIL"), "simulated embedding failure");

        let mut v = vec![0.0f32; CONCEPT_DIM];
        let mut known = false;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
        {
            for &(axis, weight) in Self::axes(&word) {
                v[axis] += weight;
                known = true;
            }
        }
        if !known {
            v[OTHER] = 1.0;
            v[text.len() % (CONCEPT_DIM - 1)] += 0.5;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(v.iter().map(|x| x / norm).collect())
    }

    fn dimensions(&self) -> usize {
        CONCEPT_DIM
    }
}

/// Loader that counts how often it runs and can fail or stall on demand.
pub struct CountingLoader {
    attempts: AtomicUsize,
    loads: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl CountingLoader {
    pub fn new() -> Arc<Self> {
        Self::build(0, Duration::ZERO)
    }

    /// Fails the first `n` loads.
    pub fn failing(n: usize) -> Arc<Self> {
        Self::build(n, Duration::ZERO)
    }

    /// Sleeps before each load so concurrent callers overlap.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(0, delay)
    }

    fn build(failures: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            delay,
        })
    }

    /// Successful loads.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// All load calls, failed or not.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self, _model_name: &str) -> Result<Box<dyn EmbeddingProvider>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("simulated load failure");
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ConceptProvider))
    }
}

pub fn as_loader(loader: &Arc<CountingLoader>) -> Arc<dyn ModelLoader> {
    Arc::clone(loader) as Arc<dyn ModelLoader>
}

pub fn registry(loader: &Arc<CountingLoader>) -> Arc<SharedModelRegistry> {
    Arc::new(SharedModelRegistry::new(as_loader(loader)))
}

pub fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().expect("metadata must be a JSON object")
}

/// Unit vector along `axis`.
pub fn unit(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    v[axis % dim] = 1.0;
    v
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
