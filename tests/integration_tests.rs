//! Integration tests against in-memory object and coordination stores.

mod cluster;

use anyhow::Result;
use cluster::{index_of, linear_index, random_corpus, Cluster};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use wcindex::codec::{decode_shard, Aggregate, ShardName, ShardRecord};
use wcindex::coordination::{CoordinationStore, InMemoryCoordinationStore};
use wcindex::coordinator::{Coordinator, RunPhase, RunStatus};
use wcindex::dispatch::{LocalDispatcher, TaskDispatcher};
use wcindex::index::{lookup, merge_word};
use wcindex::retry::RetryPolicy;
use wcindex::{partition, MapTask, ReduceTask, RunId, TaskStatus};

#[tokio::test]
async fn two_documents_end_to_end() {
    let cluster = Cluster::new(2, 2);
    cluster.stage("doc1.txt", "the cat sat");
    cluster.stage("doc2.txt", "the dog sat");

    let report = cluster.coordinator().run().await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.phase, RunPhase::Done);

    let expected = index_of(&[
        ("the", &[("doc1.txt", 1), ("doc2.txt", 1)]),
        ("cat", &[("doc1.txt", 1)]),
        ("sat", &[("doc1.txt", 1), ("doc2.txt", 1)]),
        ("dog", &[("doc2.txt", 1)]),
    ]);
    assert_eq!(cluster.index().await, expected);

    // Shards and aggregates of the run are gone; inputs stay.
    assert!(cluster.intermediate_objects().is_empty());
    assert_eq!(cluster.objects.names(), ["input/doc1.txt", "input/doc2.txt"]);
}

#[tokio::test]
async fn random_corpus_matches_linear_count() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let corpus = random_corpus(&mut rng, 12, 200);
    let cluster = Cluster::new(4, 3);
    for (document, text) in &corpus {
        cluster.stage(document, text);
    }

    let report = cluster.coordinator().run().await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.documents, 12);
    assert_eq!(cluster.index().await, linear_index(&corpus));
}

#[tokio::test]
async fn missing_document_contributes_nothing() {
    let cluster = Cluster::new(1, 1);
    cluster.stage("present.txt", "hello hello");

    let status = cluster
        .dispatcher()
        .run_map(MapTask {
            run_id: RunId::from("run"),
            document_names: vec!["absent.txt".into(), "present.txt".into()],
            mapper_index: 0,
            num_reducers: 1,
        })
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Succeeded);

    let status = cluster
        .dispatcher()
        .run_reduce(ReduceTask {
            run_id: RunId::from("run"),
            reducer_index: 0,
            num_mappers: 1,
        })
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Succeeded);
    assert_eq!(
        cluster.index().await,
        index_of(&[("hello", &[("present.txt", 2)])])
    );
}

#[tokio::test]
async fn every_word_reaches_exactly_its_reducer() {
    let mut rng = StdRng::seed_from_u64(42);
    let corpus = random_corpus(&mut rng, 6, 120);
    let cluster = Cluster::new(3, 4);
    for (document, text) in &corpus {
        cluster.stage(document, text);
    }
    let run_id = RunId::from("shards");
    let documents: Vec<String> = corpus.iter().map(|(d, _)| d.clone()).collect();

    for (mapper_index, chunk) in documents.chunks(2).enumerate() {
        let status = cluster
            .dispatcher()
            .run_map(MapTask {
                run_id: run_id.clone(),
                document_names: chunk.to_vec(),
                mapper_index: mapper_index as u32,
                num_reducers: 4,
            })
            .await
            .unwrap();
        assert!(status.is_success());
    }

    let mut emitted: BTreeMap<(u32, String), u32> = BTreeMap::new();
    for object in cluster.intermediate_objects() {
        let shard = ShardName::parse(&object).unwrap();
        for record in decode_shard(&cluster.objects.read(&object).unwrap()).unwrap() {
            assert_eq!(partition(&record.word, 4), shard.reducer_index, "{object}");
            emitted.insert((shard.mapper_index, record.word.clone()), shard.reducer_index);
        }
    }

    // Everything each mapper saw is somewhere in its shards.
    for (mapper_index, chunk) in documents.chunks(2).enumerate() {
        for (document, text) in corpus.iter().filter(|(d, _)| chunk.contains(d)) {
            for word in wcindex::wc::count_words(text).keys() {
                assert!(
                    emitted.contains_key(&(mapper_index as u32, word.clone())),
                    "{word} from {document} missing"
                );
            }
        }
    }
}

#[test]
fn merge_order_does_not_matter() {
    let mut rng = StdRng::seed_from_u64(7);
    let corpus = random_corpus(&mut rng, 8, 100);
    let mut records: Vec<ShardRecord> = corpus
        .iter()
        .flat_map(|(document, text)| {
            wcindex::wc::count_words(text)
                .into_iter()
                .map(move |(word, count)| ShardRecord::new(word, document.clone(), count))
        })
        .collect();

    let linear: Aggregate = records.iter().cloned().collect();
    for _ in 0..10 {
        records.shuffle(&mut rng);
        let (left, right) = records.split_at(records.len() / 3);
        let mut shuffled: Aggregate = right.iter().cloned().collect();
        shuffled.extend(left.iter().cloned());
        assert_eq!(shuffled, linear);
    }

    let index = linear_index(&corpus);
    for (word, counts) in &linear.words {
        assert_eq!(&counts.filenames, &index[word]);
        assert_eq!(counts.count, index[word].values().sum::<u64>());
    }
}

#[tokio::test]
async fn repeated_runs_accumulate() {
    let cluster = Cluster::new(2, 2);
    cluster.stage("doc1.txt", "the cat sat");

    cluster.coordinator().run().await.unwrap();
    cluster.coordinator().run().await.unwrap();

    let entry = lookup(&cluster.store, "words", "cat").await.unwrap().unwrap();
    assert_eq!(entry.filenames["doc1.txt"], 2);
    assert_eq!(entry.runs.len(), 1);
}

#[tokio::test]
async fn index_entries_stay_small_across_many_runs() {
    let cluster = Cluster::new(1, 1);
    cluster.stage("doc1.txt", "the");
    let coordinator = cluster.coordinator();

    let mut sizes = Vec::new();
    for _ in 0..25 {
        let report = coordinator.run().await.unwrap();
        assert_eq!(report.status, RunStatus::Complete);
        let raw = cluster.store.hash_get("words", "the").await.unwrap().unwrap();
        sizes.push(raw.len());
    }

    let entry = lookup(&cluster.store, "words", "the").await.unwrap().unwrap();
    assert_eq!(entry.filenames["doc1.txt"], 25);
    assert_eq!(entry.runs.len(), 1);
    // Only the count's digits can grow.
    assert!(sizes.iter().max().unwrap() - sizes[0] <= 1, "{sizes:?}");
}

#[tokio::test]
async fn timed_out_mapper_leaves_nothing_behind() {
    let cluster = Cluster::new(1, 1);
    cluster.stage("doc1.txt", "the cat sat");
    let mut config = (*cluster.ctx.config).clone();
    config.task = RetryPolicy {
        max_attempts: 1,
        base_delay_ms: 1,
        timeout_secs: 1,
    };
    let slow = SlowShards {
        inner: cluster.objects.clone(),
        delay: Duration::from_millis(2000),
    };
    let ctx = wcindex::TaskContext::new(Arc::new(slow), Arc::new(cluster.store.clone()), config);
    let coordinator = Coordinator::new(ctx.clone(), Arc::new(LocalDispatcher::new(ctx)));

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Partial);
    assert!(!report.mappers[0].status.is_success());
    assert!(cluster.intermediate_objects().is_empty());

    // Long enough for an abandoned upload to have landed.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(cluster.intermediate_objects().is_empty(), "{:?}", cluster.intermediate_objects());
    assert!(cluster.index().await.is_empty());
}

#[tokio::test]
async fn triggered_run_indexes_one_new_document() {
    let cluster = Cluster::new(2, 3);
    cluster.stage("doc1.txt", "the cat sat");
    let coordinator = cluster.coordinator();

    let early = coordinator.run_triggered("input/doc1.txt").await.unwrap();
    assert_eq!(early.status, RunStatus::Skipped);
    assert!(cluster.index().await.is_empty());

    coordinator.run().await.unwrap();
    cluster.stage("doc3.txt", "the bird sang");
    let report = coordinator.run_triggered("input/doc3.txt").await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);

    let index = cluster.index().await;
    assert_eq!(index["the"], BTreeMap::from([("doc1.txt".to_string(), 1), ("doc3.txt".to_string(), 1)]));
    assert_eq!(index["bird"], BTreeMap::from([("doc3.txt".to_string(), 1)]));
    assert_eq!(index["cat"], BTreeMap::from([("doc1.txt".to_string(), 1)]));
}

#[tokio::test]
async fn lost_aggregate_makes_the_run_partial() {
    let cluster = Cluster::new(1, 2);
    cluster.stage("doc1.txt", "the cat sat on the mat");
    // Aggregate names carry the run id, so match on the suffix instead.
    let store = FailingAggregates {
        inner: cluster.objects.clone(),
        reducer: 1,
    };
    let ctx = wcindex::TaskContext::new(
        Arc::new(store),
        Arc::new(cluster.store.clone()),
        (*cluster.ctx.config).clone(),
    );
    let coordinator = cluster.coordinator_with(Arc::new(LocalDispatcher::new(ctx)));

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Partial);
    let failed: Vec<u32> = report.failed_tasks().map(|outcome| outcome.index).collect();
    assert_eq!(failed, [1]);
    assert_eq!(report.reducers[1].attempts, 2);

    // Reducer 0's words still made it.
    let index = cluster.index().await;
    let expected_words = ["the", "cat", "sat", "on", "mat"]
        .into_iter()
        .filter(|word| partition(word, 2) == 0)
        .count();
    assert_eq!(index.len(), expected_words);
    assert_eq!(
        cluster.store.get("map_reduce_processing").await.unwrap().as_deref(),
        Some("NO")
    );
}

#[tokio::test]
async fn overlapping_run_is_rejected_while_first_is_mapping() {
    let cluster = Cluster::new(2, 2);
    cluster.stage("doc1.txt", "the cat sat");
    let gate = Arc::new(Semaphore::new(0));
    let first = cluster.coordinator_with(Arc::new(Gated {
        inner: cluster.dispatcher(),
        gate: gate.clone(),
    }));
    let second = cluster.coordinator();
    let mut phases = first.subscribe();

    let (first_report, second_report) = tokio::join!(first.run(), async {
        phases
            .wait_for(|phase| *phase == RunPhase::MapBarrier)
            .await
            .unwrap();
        let report = second.run().await;
        gate.add_permits(1);
        report
    });

    assert_eq!(second_report.unwrap().status, RunStatus::Rejected);
    assert_eq!(first_report.unwrap().status, RunStatus::Complete);
    assert_eq!(cluster.index().await["cat"]["doc1.txt"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_of_one_word_lose_nothing() {
    let store = Interleaving {
        inner: InMemoryCoordinationStore::new(),
    };
    let store = Arc::new(store);
    let writers = 16u64;

    let mut handles = Vec::new();
    for writer in 0..writers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let counts = BTreeMap::from([
                ("shared.txt".to_string(), 1),
                (format!("own{writer}.txt"), writer + 1),
            ]);
            merge_word(
                store.as_ref(),
                "words",
                "the",
                &counts,
                &format!("run/r{writer}"),
                1000,
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entry = lookup(store.as_ref(), "words", "the").await.unwrap().unwrap();
    assert_eq!(entry.filenames["shared.txt"], writers);
    for writer in 0..writers {
        assert_eq!(entry.filenames[&format!("own{writer}.txt")], writer + 1);
    }
    assert_eq!(entry.runs.len() as u64, writers);
}

/// Holds map tasks until the gate opens.
struct Gated {
    inner: LocalDispatcher,
    gate: Arc<Semaphore>,
}

#[tonic::async_trait]
impl TaskDispatcher for Gated {
    async fn run_map(&self, task: MapTask) -> Result<TaskStatus> {
        let _permit = self.gate.acquire().await?;
        self.inner.run_map(task).await
    }

    async fn run_reduce(&self, task: ReduceTask) -> Result<TaskStatus> {
        self.inner.run_reduce(task).await
    }
}

/// Delays every shard upload.
struct SlowShards {
    inner: wcindex::object_store::InMemoryObjectStore,
    delay: Duration,
}

#[tonic::async_trait]
impl wcindex::object_store::ObjectStore for SlowShards {
    async fn put(&self, name: &str, body: bytes::Bytes) -> Result<()> {
        if name.starts_with("mapper_outputs/") {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.put(name, body).await
    }

    async fn get(&self, name: &str) -> Result<Option<bytes::Bytes>> {
        self.inner.get(name).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }
}

/// Rejects every aggregate upload of one reducer.
struct FailingAggregates {
    inner: wcindex::object_store::InMemoryObjectStore,
    reducer: u32,
}

#[tonic::async_trait]
impl wcindex::object_store::ObjectStore for FailingAggregates {
    async fn put(&self, name: &str, body: bytes::Bytes) -> Result<()> {
        if name.ends_with(&format!("/reducer_output_{}.json", self.reducer)) {
            anyhow::bail!("aggregate store unavailable");
        }
        self.inner.put(name, body).await
    }

    async fn get(&self, name: &str) -> Result<Option<bytes::Bytes>> {
        self.inner.get(name).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }
}

/// Yields between every operation so read-modify-write cycles interleave.
struct Interleaving {
    inner: InMemoryCoordinationStore,
}

#[tonic::async_trait]
impl CoordinationStore for Interleaving {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str) -> Result<bool> {
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let value = self.inner.hash_get(hash, field).await;
        tokio::task::yield_now().await;
        value
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        self.inner.hash_set(hash, field, value).await
    }

    async fn hash_exists(&self, hash: &str, field: &str) -> Result<bool> {
        self.inner.hash_exists(hash, field).await
    }

    async fn hash_compare_and_swap(
        &self,
        hash: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        tokio::task::yield_now().await;
        self.inner
            .hash_compare_and_swap(hash, field, expected, value)
            .await
    }

    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>> {
        self.inner.hash_fields(hash).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}
