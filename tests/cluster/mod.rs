//! In-memory deployment for integration tests.

use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use wcindex::config::Config;
use wcindex::coordination::InMemoryCoordinationStore;
use wcindex::coordinator::Coordinator;
use wcindex::dispatch::{LocalDispatcher, TaskDispatcher};
use wcindex::index::snapshot;
use wcindex::object_store::InMemoryObjectStore;
use wcindex::retry::RetryPolicy;
use wcindex::TaskContext;

pub type Index = BTreeMap<String, BTreeMap<String, u64>>;

const VOCABULARY: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "cat", "sat", "on", "mat",
    "a", "an", "and", "or", "but", "if", "then", "else", "river", "stone", "light", "dark",
    "North", "south", "East", "west", "snake_case", "v2", "naïve", "café",
];

const SEPARATORS: &[&str] = &[" ", "  ", "\n", ", ", ". ", "! ", "\t", " -- ", "'"];

pub struct Cluster {
    pub objects: InMemoryObjectStore,
    pub store: InMemoryCoordinationStore,
    pub ctx: TaskContext,
}

impl Cluster {
    pub fn new(num_mappers: u32, num_reducers: u32) -> Self {
        let config = Config {
            num_mappers,
            num_reducers,
            transfer: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                timeout_secs: 5,
            },
            task: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                timeout_secs: 30,
            },
            ..Config::default()
        };
        let objects = InMemoryObjectStore::new();
        let store = InMemoryCoordinationStore::new();
        let ctx = TaskContext::new(Arc::new(objects.clone()), Arc::new(store.clone()), config);
        Self { objects, store, ctx }
    }

    pub fn stage(&self, document: &str, text: &str) {
        self.objects
            .insert(self.ctx.config.input_object(document), text.to_string());
    }

    pub fn dispatcher(&self) -> LocalDispatcher {
        LocalDispatcher::new(self.ctx.clone())
    }

    pub fn coordinator(&self) -> Coordinator {
        self.coordinator_with(Arc::new(self.dispatcher()))
    }

    pub fn coordinator_with(&self, dispatcher: Arc<dyn TaskDispatcher>) -> Coordinator {
        Coordinator::new(self.ctx.clone(), dispatcher)
    }

    pub async fn index(&self) -> Index {
        snapshot(&self.store, &self.ctx.config.index_hash).await.unwrap()
    }

    /// Objects outside the input namespace.
    pub fn intermediate_objects(&self) -> Vec<String> {
        let input = &self.ctx.config.input_prefix;
        self.objects
            .names()
            .into_iter()
            .filter(|name| !name.starts_with(input.as_str()))
            .collect()
    }
}

/// Builds an index literal from `(word, [(document, count)])` pairs.
pub fn index_of(entries: &[(&str, &[(&str, u64)])]) -> Index {
    entries
        .iter()
        .map(|(word, documents)| {
            let documents = documents
                .iter()
                .map(|(document, count)| (document.to_string(), *count))
                .collect();
            (word.to_string(), documents)
        })
        .collect()
}

/// `documents` random texts named `doc{i}.txt`, mixing words with
/// punctuation and uneven whitespace.
pub fn random_corpus(rng: &mut StdRng, documents: usize, words: usize) -> Vec<(String, String)> {
    (0..documents)
        .map(|i| {
            let mut text = String::new();
            for _ in 0..words {
                text.push_str(VOCABULARY[rng.gen_range(0..VOCABULARY.len())]);
                text.push_str(SEPARATORS[rng.gen_range(0..SEPARATORS.len())]);
            }
            (format!("doc{i}.txt"), text)
        })
        .collect()
}

/// Reference index computed in one pass, without any MapReduce.
pub fn linear_index(corpus: &[(String, String)]) -> Index {
    let mut index = Index::new();
    for (document, text) in corpus {
        for (word, count) in wcindex::wc::count_words(text) {
            *index
                .entry(word)
                .or_default()
                .entry(document.clone())
                .or_insert(0) += count;
        }
    }
    index
}
