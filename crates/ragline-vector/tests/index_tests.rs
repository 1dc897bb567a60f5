use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quickcheck_macros::quickcheck;
use ragline_core::{Chunk, ChunkSource, EmbeddingProvider, Error, Result};
use ragline_embed::HashingEmbedder;
use ragline_vector::{IndexBuilder, VectorIndex};

fn chunk(id: &str) -> Chunk {
    let source = ChunkSource { path: format!("{id}.txt"), ..ChunkSource::default() };
    Chunk::new(id, format!("text of {id}"), source)
}

fn scenario_index() -> VectorIndex {
    let index = VectorIndex::new("test");
    index.insert(chunk("c1"), vec![1.0, 0.0]).expect("insert");
    index.insert(chunk("c2"), vec![0.0, 1.0]).expect("insert");
    index.insert(chunk("c3"), vec![0.9, 0.1]).expect("insert");
    index
}

#[test]
fn top_two_of_three() {
    let index = scenario_index();
    let hits = index.search(&[1.0, 0.0], 2).expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "c1");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].id, "c3");
    assert!((hits[1].score - 0.994).abs() < 1e-3);

    let chunks = index.search_chunks(&[1.0, 0.0], 2).expect("search");
    let ids: Vec<&str> = chunks.iter().map(|s| s.chunk.id.as_str()).collect();
    assert_eq!(ids, ["c1", "c3"]);
}

#[test]
fn empty_index_returns_nothing() {
    let index = VectorIndex::new("test");
    assert!(index.search(&[1.0, 0.0, 0.0], 5).expect("search").is_empty());
    assert!(index.is_empty());
    assert_eq!(index.dim(), None);
}

#[test]
fn wrong_dimension_insert_leaves_index_unchanged() {
    let index = scenario_index();
    let err = index.insert(chunk("c4"), vec![1.0, 0.0, 0.0]).expect_err("3-d into 2-d");
    assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3 }));
    assert_eq!(index.len(), 3);
    assert!(index.get("c4").is_none());

    let err = index.search(&[1.0, 0.0, 0.0], 1).expect_err("3-d query");
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[test]
fn invalid_and_duplicate_vectors_are_rejected() {
    let index = scenario_index();
    assert!(matches!(index.insert(chunk("c5"), vec![]), Err(Error::InvalidVector(_))));
    assert!(matches!(index.insert(chunk("c5"), vec![f32::NAN, 1.0]), Err(Error::InvalidVector(_))));
    assert!(matches!(index.insert(chunk("c1"), vec![0.5, 0.5]), Err(Error::DuplicateChunk(_))));
    assert_eq!(index.len(), 3);
}

#[test]
fn ties_break_by_insertion_order() {
    let index = VectorIndex::new("test");
    for id in ["b", "a", "c"] {
        index.insert(chunk(id), vec![2.0, 2.0]).expect("insert");
    }
    let ids: Vec<String> = index.search(&[1.0, 1.0], 3).expect("search").into_iter().map(|h| h.id).collect();
    assert_eq!(ids, ["b", "a", "c"]);
    let chunks: Vec<String> = index.chunks().iter().map(|c| c.id.clone()).collect();
    assert_eq!(chunks, ["b", "a", "c"]);
}

#[test]
fn signed_zero_scores_still_tie_by_insertion_order() {
    let index = VectorIndex::new("test");
    index.insert(chunk("first"), vec![-0.0, -1.0]).expect("insert");
    index.insert(chunk("second"), vec![0.0, 1.0]).expect("insert");
    let hits = index.search(&[1.0, 0.0], 2).expect("search");
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["first", "second"]);
    assert_eq!(hits[0].score.to_bits(), hits[1].score.to_bits());
}

#[quickcheck]
fn search_is_bounded_and_sorted(vectors: Vec<(i8, i8, i8)>, query: (i8, i8, i8), k: u8) -> bool {
    let index = VectorIndex::new("qc");
    for (i, (x, y, z)) in vectors.iter().enumerate() {
        let v = vec![f32::from(*x), f32::from(*y), f32::from(*z)];
        if index.insert(chunk(&format!("d{i}")), v).is_err() {
            return false;
        }
    }
    let q = [f32::from(query.0), f32::from(query.1), f32::from(query.2)];
    let k = usize::from(k);
    let hits = match index.search(&q, k) {
        Ok(hits) => hits,
        Err(_) => return false,
    };
    hits.len() == k.min(vectors.len())
        && hits.windows(2).all(|w| w[0].score >= w[1].score)
        && hits.iter().all(|h| (-1.0..=1.0).contains(&h.score))
}

#[test]
fn snapshot_round_trip_preserves_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("index.json");
    let index = scenario_index();
    index.save(&path).expect("save");

    let loaded = VectorIndex::load_for(&path, "test").expect("load");
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.dim(), Some(2));
    let before = index.search(&[0.3, 0.7], 3).expect("search");
    let after = loaded.search(&[0.3, 0.7], 3).expect("search");
    assert_eq!(before, after);
    assert_eq!(loaded.get("c2").expect("c2").source.path, "c2.txt");

    let err = VectorIndex::load_for(&path, "other").expect_err("embedder changed");
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn concurrent_readers_see_whole_inserts() {
    let index = Arc::new(VectorIndex::new("test"));
    let writer = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || {
            for i in 0..200 {
                index.insert(chunk(&format!("w{i}")), vec![1.0, i as f32]).expect("insert");
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let hits = index.search_chunks(&[1.0, 0.0], 5).expect("search");
                    assert!(hits.iter().all(|h| h.chunk.vector.as_ref().is_some_and(|v| v.len() == 2)));
                }
            })
        })
        .collect();
    writer.join().expect("writer");
    for r in readers {
        r.join().expect("reader");
    }
    assert_eq!(index.len(), 200);
}

/// Records the size of every batch it is asked to embed.
struct Recording {
    inner: HashingEmbedder,
    batches: std::sync::Mutex<Vec<usize>>,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for Recording {
    fn embedder_id(&self) -> &str {
        self.inner.embedder_id()
    }
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().expect("lock").push(texts.len());
        self.inner.embed_batch(texts).await
    }
}

#[tokio::test]
async fn builder_embeds_in_batches_and_keeps_order() {
    let embedder = Arc::new(Recording {
        inner: HashingEmbedder::new(16),
        batches: std::sync::Mutex::new(Vec::new()),
        calls: AtomicUsize::new(0),
    });
    let chunks: Vec<Chunk> = (0..10).map(|i| chunk(&format!("doc:{i}"))).collect();
    let index = IndexBuilder::new(embedder.clone())
        .batch_size(4)
        .concurrency(3)
        .build(chunks)
        .await
        .expect("build");

    assert_eq!(index.len(), 10);
    assert_eq!(index.dim(), Some(16));
    assert_eq!(index.embedder_id(), "hash:xxh64:d16");
    let ids: Vec<String> = index.chunks().iter().map(|c| c.id.clone()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("doc:{i}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    let mut sizes = embedder.batches.lock().expect("lock").clone();
    sizes.sort_unstable();
    assert_eq!(sizes, [2, 4, 4]);

    let top = index.search_chunks(&embedder.embed("text of doc:7").await.expect("embed"), 1).expect("search");
    assert_eq!(top[0].chunk.id, "doc:7");
}

#[tokio::test]
async fn builder_rejects_foreign_index() {
    let index = VectorIndex::new("someone-else");
    let builder = IndexBuilder::new(Arc::new(HashingEmbedder::new(8)));
    let err = builder.extend(&index, vec![chunk("x")]).await.expect_err("embedder mismatch");
    assert!(matches!(err, Error::InvalidConfig(_)));
}
