use crate::config::{RetryConfig, SourceConfig};
use crate::error::{Result, SyncError};
use crate::models::{Record, RecordSchema};
use crate::retry::run_with_retry;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderName, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page budget for one fetch when paging is enabled
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Which slice of the source to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: Option<usize>,
}

/// An external data source returning raw JSON items
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name used in log lines
    fn label(&self) -> &str;

    /// Fetch one page of raw items
    async fn fetch_page(&self, page: PageRequest) -> Result<Vec<Value>>;
}

/// Source backed by an HTTP endpoint returning a JSON array
pub struct HttpSource {
    client: Client,
    url: String,
    api_key: String,
    api_key_header: HeaderName,
    filters: BTreeMap<String, String>,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        let api_key_header = HeaderName::from_bytes(config.api_key_header.as_bytes()).map_err(|_| {
            SyncError::config(format!("Invalid API key header name: {}", config.api_key_header))
        })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            api_key_header,
            filters: config.filters.clone(),
        })
    }

    /// Query parameters for a page: configured filters first, then paging
    pub fn query_params(&self, page: PageRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> =
            self.filters.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        if let Some(limit) = page.limit {
            params.push(("offset".to_string(), page.offset.to_string()));
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }
}

/// Accept either a bare array or an object wrapping the array in `data`
pub fn items_from_body(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(SyncError::source_unavailable("Response object has no 'data' array")),
        },
        other => Err(SyncError::source_unavailable(format!(
            "Expected a JSON array, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait::async_trait]
impl RecordSource for HttpSource {
    fn label(&self) -> &str {
        &self.url
    }

    async fn fetch_page(&self, page: PageRequest) -> Result<Vec<Value>> {
        debug!("Fetching {} (offset {}, limit {:?})", self.url, page.offset, page.limit);

        let mut request = self.client.get(&self.url).query(&self.query_params(page));
        request = if self.api_key_header == AUTHORIZATION {
            request.bearer_auth(&self.api_key)
        } else {
            request.header(self.api_key_header.clone(), self.api_key.as_str())
        };

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::source_unavailable(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SyncError::source_unavailable(format!(
                "API request failed with status: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::source_unavailable(format!("Failed to read response body: {}", e)))?;

        items_from_body(body)
    }
}

/// Everything a completed fetch produced
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    /// `MalformedPayload` errors for skipped items
    pub malformed: Vec<SyncError>,
}

struct FetchState {
    offset: usize,
    pages: usize,
    next_index: usize,
    buffer: VecDeque<(usize, Value)>,
    exhausted: bool,
}

/// Pulls records from a source page by page, retrying transient failures
pub struct Fetcher {
    source: Arc<dyn RecordSource>,
    schema: RecordSchema,
    retry: RetryConfig,
    page_size: Option<usize>,
    max_pages: usize,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn RecordSource>,
        schema: RecordSchema,
        retry: RetryConfig,
        page_size: Option<usize>,
    ) -> Self {
        Self { source, schema, retry, page_size, max_pages: DEFAULT_MAX_PAGES }
    }

    /// Give up with `SourceUnavailable` when paging has not ended after this many pages
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Lazily stream records. Malformed items come through as `MalformedPayload` errors and the
    /// stream keeps going; a `SourceUnavailable` error is always the last item.
    /// Each call starts a fresh fetch from the first page. A page larger than the requested
    /// limit means the source ignores paging, so that page is the last one.
    pub fn fetch(&self) -> impl Stream<Item = Result<Record>> + '_ {
        let state =
            FetchState { offset: 0, pages: 0, next_index: 0, buffer: VecDeque::new(), exhausted: false };

        stream::unfold(state, move |mut state| async move {
            loop {
                if let Some((index, raw)) = state.buffer.pop_front() {
                    return Some((self.schema.parse(index, raw), state));
                }
                if state.exhausted {
                    return None;
                }

                let page = PageRequest { offset: state.offset, limit: self.page_size };
                match self.fetch_page_with_retry(page).await {
                    Ok(items) => {
                        let count = items.len();
                        state.pages += 1;
                        state.exhausted = match self.page_size {
                            None => true,
                            Some(limit) if count > limit => {
                                warn!(
                                    "{} returned {} items for a page of {}, not paging further",
                                    self.source.label(),
                                    count,
                                    limit
                                );
                                true
                            }
                            Some(limit) => count < limit,
                        };
                        if !state.exhausted && state.pages >= self.max_pages {
                            state.exhausted = true;
                            let message = format!(
                                "{} still returning full pages after {} pages",
                                self.source.label(),
                                state.pages
                            );
                            return Some((Err(SyncError::source_unavailable(message)), state));
                        }
                        state.offset += count;
                        for raw in items {
                            state.buffer.push_back((state.next_index, raw));
                            state.next_index += 1;
                        }
                    }
                    Err(e) => {
                        state.exhausted = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
    }

    async fn fetch_page_with_retry(&self, page: PageRequest) -> Result<Vec<Value>> {
        let label = format!("Fetch from {}", self.source.label());
        run_with_retry(&label, &self.retry, || self.source.fetch_page(page)).await
    }

    /// Drain the stream, collecting malformed items instead of failing on them
    pub async fn fetch_all(&self) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();

        let stream = self.fetch();
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => outcome.records.push(record),
                Err(e) if e.is_per_record() => {
                    warn!("Skipping item from {}: {}", self.source.label(), e);
                    outcome.malformed.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Fetched {} records from {} ({} malformed)",
            outcome.records.len(),
            self.source.label(),
            outcome.malformed.len()
        );
        Ok(outcome)
    }
}
