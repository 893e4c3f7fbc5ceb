use crate::assemble::Assembler;
use crate::config::AppConfig;
use crate::extract::{ExtractionError, ExtractionUpdate, Extractor, PartialStream};
use crate::fetch::{ContentFetcher, FetchError, FirecrawlClient, RawContent};
use crate::http::build_client;
use crate::llm::OpenAiClient;
use crate::models::{ExtractedItem, PartialItem, SearchResponse, StreamFrame};
use crate::query::{self, FetchTarget, QueryError};
use futures::Stream;
use std::{fmt, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Runs query → fetch → extract → assemble. Cloning is cheap; every call is an
/// independent invocation with no state shared beyond the collaborators.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn ContentFetcher>,
    extractor: Extractor,
    assembler: Assembler,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, extractor: Extractor, assembler: Assembler) -> Self {
        Self {
            fetcher,
            extractor,
            assembler,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let http = build_client(&config.http);
        let fetcher = FirecrawlClient::new(http.clone(), config.fetch.clone());
        let llm = OpenAiClient::new(http, config.llm.clone());
        Self::new(
            Arc::new(fetcher),
            Extractor::new(
                Arc::new(llm),
                config.search.results_cap,
                config.search.stream_capacity,
            ),
            Assembler::new(config.search.currency.clone(), config.search.results_cap),
        )
    }

    /// Single-shot mode: waits for the complete extraction.
    pub async fn run(&self, query: &str) -> Result<SearchResponse, PipelineError> {
        let started = Instant::now();
        let search_id = Uuid::new_v4();
        info!(target = "halcon.pipeline", %search_id, query, "search_started");
        transition(search_id, PipelineState::Idle);

        let result = async {
            let content = self.prepare(search_id, query).await?;
            transition(search_id, PipelineState::Extracting);
            let items = capture_stage("extract", async {
                self.extractor
                    .extract_all(&content, query)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
            Ok::<_, PipelineError>(self.assembler.assemble(&items, query, started))
        }
        .await;

        match &result {
            Ok(response) => {
                transition(search_id, PipelineState::Complete);
                info!(
                    target = "halcon.pipeline",
                    %search_id,
                    total_found = response.total_found,
                    elapsed_ms = response.execution_time_ms,
                    "search_completed"
                );
            }
            Err(err) => log_failure(search_id, query, err),
        }
        result
    }

    /// Incremental mode. Normalization and fetching finish before this returns,
    /// so their failures surface as a plain error; extraction failures arrive as
    /// the stream's terminal event.
    pub async fn stream(&self, query: &str) -> Result<SearchStream, PipelineError> {
        let started = Instant::now();
        let search_id = Uuid::new_v4();
        info!(target = "halcon.pipeline", %search_id, query, "search_stream_started");
        transition(search_id, PipelineState::Idle);

        let content = match self.prepare(search_id, query).await {
            Ok(content) => content,
            Err(err) => {
                log_failure(search_id, query, &err);
                return Err(err);
            }
        };
        transition(search_id, PipelineState::Extracting);
        let partials = self.extractor.extract_stream(content, query);

        Ok(SearchStream {
            search_id,
            query: query.to_string(),
            started,
            assembler: self.assembler.clone(),
            partials,
            emissions: 0,
            finished: false,
        })
    }

    async fn prepare(&self, search_id: Uuid, query: &str) -> Result<RawContent, PipelineError> {
        transition(search_id, PipelineState::Normalizing);
        let target: FetchTarget = query::normalize(query)?;
        transition(search_id, PipelineState::Fetching);
        capture_stage("fetch", async {
            let content = self.fetcher.fetch(&target).await?;
            debug!(
                target = "halcon.pipeline",
                %search_id,
                fetch_target = %target,
                bytes = content.len(),
                "content_fetched"
            );
            Ok(content)
        })
        .await
    }
}

/// What a streaming consumer observes.
#[derive(Debug)]
pub enum SearchEvent {
    Partial(StreamFrame),
    Complete(StreamFrame),
    Failed(PipelineError),
}

pub struct SearchStream {
    search_id: Uuid,
    query: String,
    started: Instant,
    assembler: Assembler,
    partials: PartialStream,
    emissions: usize,
    finished: bool,
}

impl SearchStream {
    pub fn search_id(&self) -> Uuid {
        self.search_id
    }

    /// Next event; `None` once `Complete` or `Failed` has been returned.
    pub async fn next(&mut self) -> Option<SearchEvent> {
        if self.finished {
            return None;
        }

        match self.partials.next().await {
            Some(Ok(ExtractionUpdate::Partial(state))) => {
                transition(self.search_id, PipelineState::Streaming);
                self.emissions += 1;
                crate::metrics::stream_emission(state.len());
                let frame = self.frame(&state.lossy_items(), state.products.clone());
                Some(SearchEvent::Partial(frame))
            }
            Some(Ok(ExtractionUpdate::Final(state))) => {
                let products = state.products.clone();
                match state.into_complete() {
                    Ok(items) => {
                        self.finished = true;
                        transition(self.search_id, PipelineState::Complete);
                        info!(
                            target = "halcon.pipeline",
                            search_id = %self.search_id,
                            total_found = items.len(),
                            emissions = self.emissions,
                            "search_stream_completed"
                        );
                        Some(SearchEvent::Complete(self.frame(&items, products)))
                    }
                    Err(idx) => Some(self.fail(PipelineError::new(
                        "extract",
                        PipelineErrorKind::ExtractionFailed,
                        format!("product {idx} incomplete when extraction closed"),
                    ))),
                }
            }
            Some(Err(err)) => Some(self.fail(err.into())),
            None => Some(self.fail(PipelineError::new(
                "extract",
                PipelineErrorKind::ExtractionFailed,
                "extraction closed without a result",
            ))),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = SearchEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let event = stream.next().await?;
            Some((event, stream))
        })
    }

    fn frame(&self, items: &[ExtractedItem], products: Vec<PartialItem>) -> StreamFrame {
        StreamFrame {
            response: self.assembler.assemble(items, &self.query, self.started),
            products,
        }
    }

    // Partial state is discarded; it was never a committed result.
    fn fail(&mut self, err: PipelineError) -> SearchEvent {
        self.finished = true;
        self.partials.close();
        log_failure(self.search_id, &self.query, &err);
        SearchEvent::Failed(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Normalizing,
    Fetching,
    Extracting,
    Streaming,
    Complete,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Normalizing => "normalizing",
            PipelineState::Fetching => "fetching",
            PipelineState::Extracting => "extracting",
            PipelineState::Streaming => "streaming",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(search_id: Uuid, state: PipelineState) {
    debug!(target = "halcon.pipeline", %search_id, %state, "state");
}

fn log_failure(search_id: Uuid, query: &str, err: &PipelineError) {
    transition(search_id, PipelineState::Failed);
    error!(
        target = "halcon.pipeline",
        %search_id,
        query,
        stage = err.stage(),
        kind = ?err.kind(),
        error = %err.detail(),
        "search_failed"
    );
}

async fn capture_stage<T, Fut>(name: &'static str, fut: Fut) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let started = Instant::now();
    let outcome = fut.await;
    crate::metrics::stage_elapsed(name, started.elapsed().as_millis());
    outcome
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidQuery,
    FetchFailed,
    FetchEmpty,
    ExtractionFailed,
}

impl PipelineError {
    pub fn new(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn is_caller_error(&self) -> bool {
        self.kind == PipelineErrorKind::InvalidQuery
    }
}

impl From<QueryError> for PipelineError {
    fn from(err: QueryError) -> Self {
        Self::new("normalize", PipelineErrorKind::InvalidQuery, err.to_string())
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        let kind = match err {
            FetchError::Failed(_) => PipelineErrorKind::FetchFailed,
            FetchError::Empty(_) => PipelineErrorKind::FetchEmpty,
        };
        Self::new("fetch", kind, err.to_string())
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        Self::new("extract", PipelineErrorKind::ExtractionFailed, err.to_string())
    }
}
