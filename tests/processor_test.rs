mod helpers;

use std::collections::HashSet;
use std::thread;

use helpers::{as_loader, meta, CountingLoader};
use ragmem::InputProcessor;
use serde_json::json;
use tempfile::TempDir;

fn processor(dir: &TempDir) -> (InputProcessor, std::sync::Arc<CountingLoader>) {
    let loader = CountingLoader::new();
    let processor = InputProcessor::with_loader("inputs", dir.path(), "concept", as_loader(&loader));
    (processor, loader)
}

#[test]
fn semantically_close_text_ranks_first() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);

    let stored = p.process_batch(&["the cat sat", "the dog ran", "quantum computing basics"], None);
    assert_eq!(stored, 3);

    let matches = p.search_similar("a cat is sitting", 2);
    let texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["the cat sat", "the dog ran"]);
    assert!(matches[0].distance <= matches[1].distance);
}

#[test]
fn every_stored_text_is_its_own_nearest_match() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);
    let texts = ["the cat sat", "the dog ran", "quantum physics", "computer software"];

    assert_eq!(p.process_batch(&texts, None), texts.len());

    for text in texts {
        let top = p.search_similar(text, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text, text);
        assert!(top[0].distance.abs() < 1e-5, "distance was {}", top[0].distance);
    }
}

#[test]
fn batch_continues_past_failures() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);
    let texts = ["one cat", "FAIL two", "three dogs", "four FAIL", "five kittens"];

    assert_eq!(p.process_batch(&texts, None), 3);
    assert_eq!(p.count().unwrap(), 3);
}

#[test]
fn caller_metadata_overrides_system_keys() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);

    let extra = meta(json!({"type": "custom", "source": "test"}));
    let id = p.try_process_single("the cat sat", Some(&extra)).unwrap();

    let record = &p.get(&[id]).unwrap()[0];
    assert_eq!(record.metadata["type"], "custom");
    assert_eq!(record.metadata["source"], "test");
    assert!(record.metadata["timestamp"].is_string());
}

#[test]
fn short_metadata_list_applies_by_position() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);

    let metadata = vec![meta(json!({"source": "first"}))];
    assert_eq!(p.process_batch(&["a cat", "a dog"], Some(&metadata[..])), 2);

    let matches = p.search_similar("a cat", 2);
    let cat = matches.iter().find(|m| m.text == "a cat").unwrap();
    let dog = matches.iter().find(|m| m.text == "a dog").unwrap();
    assert_eq!(cat.metadata["source"], "first");
    assert!(dog.metadata.get("source").is_none());
    assert_eq!(dog.metadata["type"], "user_input");
}

#[test]
fn search_on_empty_store_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);
    assert!(p.search_similar("anything at all", 5).is_empty());
    assert!(p.try_search_similar("anything at all", 5).unwrap().is_empty());
}

#[test]
fn embedding_failure_stores_nothing() {
    let dir = TempDir::new().unwrap();
    let (p, _) = processor(&dir);

    assert!(!p.process_single("this will FAIL", None));
    assert!(matches!(
        p.try_process_single("FAIL again", None),
        Err(ragmem::RagError::EmbeddingFailure(_))
    ));
    assert_eq!(p.count().unwrap(), 0);
}

#[test]
fn failed_initialization_is_retried() {
    let dir = TempDir::new().unwrap();
    let loader = CountingLoader::failing(1);
    let p = InputProcessor::with_loader("inputs", dir.path(), "concept", as_loader(&loader));

    assert!(!p.initialize());
    assert!(!p.is_initialized());

    assert!(p.process_single("the cat sat", None));
    assert!(p.is_initialized());
    assert_eq!(loader.attempt_count(), 2);
}

#[test]
fn concurrent_writers_do_not_interfere() {
    let dir = TempDir::new().unwrap();
    let (p, loader) = processor(&dir);

    let ids: Vec<String> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let p = &p;
                s.spawn(move || {
                    (0..10)
                        .map(|i| {
                            let text = format!("writer {t} cat {i}");
                            let id = p.try_process_single(&text, None).unwrap();
                            (id, text)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|(id, text)| {
                assert_eq!(p.get(&[id.clone()]).unwrap()[0].text, text);
                id
            })
            .collect()
    });

    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 40);
    assert_eq!(p.count().unwrap(), 40);
    assert_eq!(loader.load_count(), 1);
}

#[test]
fn records_survive_a_new_processor() {
    let dir = TempDir::new().unwrap();
    {
        let (p, _) = processor(&dir);
        assert!(p.process_single("the dog ran", None));
    }

    let (p, _) = processor(&dir);
    assert_eq!(p.count().unwrap(), 1);
    assert_eq!(p.search_similar("dog running", 1)[0].text, "the dog ran");
}
