//! In-memory collaborators for pipeline and handler tests.

use crate::fetch::{ContentFetcher, FetchError, RawContent};
use crate::llm::{ExtractionService, LlmError, TextDeltaStream};
use crate::query::FetchTarget;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

pub enum FetchBehavior {
    Content(String),
    Fail,
    Empty,
}

pub struct FakeFetcher {
    behavior: FetchBehavior,
    calls: Arc<AtomicUsize>,
    targets: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn content(text: &str) -> Self {
        Self::with(FetchBehavior::Content(text.to_string()))
    }

    pub fn failing() -> Self {
        Self::with(FetchBehavior::Fail)
    }

    pub fn empty() -> Self {
        Self::with(FetchBehavior::Empty)
    }

    fn with(behavior: FetchBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            targets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn targets(&self) -> Arc<Mutex<Vec<String>>> {
        self.targets.clone()
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<RawContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.targets.lock() {
            seen.push(target.as_str().to_string());
        }
        match &self.behavior {
            FetchBehavior::Content(text) => Ok(RawContent::new(text.clone())),
            FetchBehavior::Fail => Err(FetchError::Failed("connection reset".into())),
            FetchBehavior::Empty => Err(FetchError::Empty(target.to_string())),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Ending {
    Clean,
    Error,
    Panic,
}

enum ExtractionBehavior {
    Object(Value),
    Deltas { parts: Vec<String>, ending: Ending },
    Fail,
}

enum Step {
    Yield(Result<String, LlmError>),
    Panic,
}

/// Scripted extraction service. One script serves both modes: an object is
/// streamed as a single delta, deltas are concatenated for the blocking call.
pub struct FakeExtraction {
    behavior: ExtractionBehavior,
    calls: Arc<AtomicUsize>,
    polled: Arc<AtomicUsize>,
}

impl FakeExtraction {
    pub fn object(value: Value) -> Self {
        Self::with(ExtractionBehavior::Object(value))
    }

    pub fn deltas(parts: &[&str]) -> Self {
        Self::scripted(parts, Ending::Clean)
    }

    pub fn deltas_then_error(parts: &[&str]) -> Self {
        Self::scripted(parts, Ending::Error)
    }

    /// The delta stream panics after the given parts, taking the producer task down.
    pub fn deltas_then_panic(parts: &[&str]) -> Self {
        Self::scripted(parts, Ending::Panic)
    }

    fn scripted(parts: &[&str], ending: Ending) -> Self {
        Self::with(ExtractionBehavior::Deltas {
            parts: parts.iter().map(|p| p.to_string()).collect(),
            ending,
        })
    }

    pub fn failing() -> Self {
        Self::with(ExtractionBehavior::Fail)
    }

    fn with(behavior: ExtractionBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            polled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn polled_counter(&self) -> Arc<AtomicUsize> {
        self.polled.clone()
    }
}

#[async_trait]
impl ExtractionService for FakeExtraction {
    async fn generate_object(&self, _prompt: &str, _schema: &Value) -> Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ExtractionBehavior::Object(value) => Ok(value.clone()),
            ExtractionBehavior::Deltas {
                ending: Ending::Clean,
                parts,
            } => serde_json::from_str(&parts.concat())
                .map_err(|err| LlmError::InvalidResponse(err.to_string())),
            ExtractionBehavior::Deltas { .. } | ExtractionBehavior::Fail => {
                Err(LlmError::Http("HTTP 500".into()))
            }
        }
    }

    async fn stream_object(
        &self,
        _prompt: &str,
        _schema: &Value,
    ) -> Result<TextDeltaStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (parts, ending) = match &self.behavior {
            ExtractionBehavior::Object(value) => (vec![value.to_string()], Ending::Clean),
            ExtractionBehavior::Deltas { parts, ending } => (parts.clone(), *ending),
            ExtractionBehavior::Fail => return Err(LlmError::Http("HTTP 500".into())),
        };
        let mut steps: Vec<Step> = parts.into_iter().map(|p| Step::Yield(Ok(p))).collect();
        match ending {
            Ending::Clean => {}
            Ending::Error => steps.push(Step::Yield(Err(LlmError::Http("stream reset".into())))),
            Ending::Panic => steps.push(Step::Panic),
        }
        let polled = self.polled.clone();
        Ok(futures::stream::iter(steps)
            .inspect(move |_| {
                polled.fetch_add(1, Ordering::SeqCst);
            })
            .then(|step| async move {
                tokio::task::yield_now().await;
                match step {
                    Step::Yield(item) => item,
                    Step::Panic => panic!("delta stream crashed"),
                }
            })
            .boxed())
    }
}
