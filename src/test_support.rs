//! Deterministic stand-ins for the embedding and generation services.

use std::{
    collections::{VecDeque, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::{
    error::{Error, Result},
    llm::{Embedder, GenerationRequest, Generator, TokenStream},
};

/// Bag-of-words embedder: each lowercase token bumps one hashed slot.
///
/// Texts sharing words land close together, so nearest-neighbour search
/// behaves predictably in tests.
pub struct HashEmbedder {
    dimension: usize,
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Succeed `n` times, then return an upstream error.
    pub fn failing_after(dimension: usize, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(dimension)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after
            && n >= limit
        {
            return Err(Error::upstream("embedder", "scripted failure"));
        }
        Ok(self.vector(text))
    }
}

#[derive(Clone)]
enum StreamScript {
    Fragments(Vec<String>),
    /// Fragments, then never yields again.
    Stall(Vec<String>),
    /// Fragments, then an upstream error.
    FailAfter(Vec<String>),
    /// The same fragment forever.
    Endless(String),
    /// Opening the stream fails.
    Refuse,
}

/// Generator that replays canned output and records every request.
pub struct ScriptedGenerator {
    completions: Mutex<VecDeque<Result<String>>>,
    stream: StreamScript,
    requests: Mutex<Vec<GenerationRequest>>,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            stream: StreamScript::Fragments(Vec::new()),
            requests: Mutex::new(Vec::new()),
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue replies for successive `complete` calls.
    pub fn with_completions(self, replies: &[&str]) -> Self {
        if let Ok(mut queue) = self.completions.lock() {
            queue.extend(replies.iter().map(|r| Ok(r.to_string())));
        }
        self
    }

    pub fn with_failing_completion(self) -> Self {
        if let Ok(mut queue) = self.completions.lock() {
            queue.push_back(Err(Error::upstream("generator", "scripted")));
        }
        self
    }

    pub fn with_stream(mut self, fragments: &[&str]) -> Self {
        self.stream = StreamScript::Fragments(owned(fragments));
        self
    }

    pub fn with_stalling_stream(mut self, fragments: &[&str]) -> Self {
        self.stream = StreamScript::Stall(owned(fragments));
        self
    }

    pub fn with_failing_stream(mut self, fragments: &[&str]) -> Self {
        self.stream = StreamScript::FailAfter(owned(fragments));
        self
    }

    pub fn with_refused_stream(mut self) -> Self {
        self.stream = StreamScript::Refuse;
        self
    }

    pub fn with_endless_stream(mut self, fragment: &str) -> Self {
        self.stream = StreamScript::Endless(fragment.to_string());
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Fragments consumers have pulled from streams so far.
    pub fn fragments_pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: GenerationRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn owned(fragments: &[&str]) -> Vec<String> {
    fragments.iter().map(|f| f.to_string()).collect()
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: GenerationRequest) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);
        self.completions
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(Error::upstream("generator", "no scripted completion"))
            })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);

        let pulled = Arc::clone(&self.pulled);
        let count = move |item: Result<String>| {
            pulled.fetch_add(1, Ordering::SeqCst);
            item
        };

        let stream = match self.stream.clone() {
            StreamScript::Fragments(f) => {
                stream::iter(f.into_iter().map(Ok)).map(count).boxed()
            }
            StreamScript::Stall(f) => stream::iter(f.into_iter().map(Ok))
                .map(count)
                .chain(stream::pending())
                .boxed(),
            StreamScript::FailAfter(f) => stream::iter(f.into_iter().map(Ok))
                .chain(stream::once(async {
                    Err(Error::upstream("generator", "stream broke"))
                }))
                .map(count)
                .boxed(),
            StreamScript::Endless(f) => {
                stream::repeat_with(move || Ok(f.clone())).map(count).boxed()
            }
            StreamScript::Refuse => {
                return Err(Error::upstream("generator", "stream refused"));
            }
        };
        Ok(stream)
    }
}
