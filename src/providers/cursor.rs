//! Cursor provider
//!
//! Fetches usage events from the dashboard API. The first page is requested
//! alone to learn the total event count; the remaining pages go out
//! concurrently with a bounded number in flight. A page that fails or times
//! out is dropped, never the whole batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{parse_timestamp_str, ProviderFetcher, ProviderId, UsageEntry};
use crate::pricing::PricingTable;
use crate::storage::TokenProvider;

const USAGE_EVENTS_URL: &str = "https://cursor.com/api/dashboard/get-filtered-usage-events";
const ORIGIN: &str = "https://cursor.com";
const SESSION_COOKIE: &str = "WorkosCursorSessionToken";

/// Events requested per page
const PAGE_SIZE: u64 = 1000;

/// Cap on concurrently in-flight page requests
const MAX_IN_FLIGHT_PAGES: usize = 8;

pub struct CursorProvider {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl CursorProvider {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { client, tokens }
    }
}

#[async_trait]
impl ProviderFetcher for CursorProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Cursor
    }

    async fn fetch_entries(
        &self,
        _pricing: &PricingTable,
    ) -> Result<Vec<UsageEntry>, anyhow::Error> {
        // No stored session means no contribution, not an error
        let Some(token) = self.tokens.session_token(ProviderId::Cursor) else {
            tracing::debug!("No Cursor session token stored; skipping");
            return Ok(Vec::new());
        };

        let fetcher: Arc<dyn UsagePageFetcher> = Arc::new(HttpPageFetcher {
            client: self.client.clone(),
            token,
        });
        let events = fetch_all_events(fetcher, PAGE_SIZE).await;
        Ok(parse_events(&events))
    }
}

/// One page of the usage-events endpoint
#[async_trait]
pub(crate) trait UsagePageFetcher: Send + Sync {
    async fn fetch_page(&self, page: u64, page_size: u64) -> Result<UsagePage, anyhow::Error>;
}

struct HttpPageFetcher {
    client: reqwest::Client,
    token: String,
}

#[async_trait]
impl UsagePageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, page: u64, page_size: u64) -> Result<UsagePage, anyhow::Error> {
        let response = self
            .client
            .post(USAGE_EVENTS_URL)
            .header("Origin", ORIGIN)
            .header("Cookie", format!("{SESSION_COOKIE}={}", self.token))
            .header("User-Agent", "UsageDeck/1.0")
            .json(&serde_json::json!({ "pageSize": page_size, "page": page }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Cursor API returned status: {}",
                response.status()
            ));
        }

        Ok(response.json().await?)
    }
}

/// Fetch every page of usage events. Pages are 1-indexed; the first request
/// reports the server-side total, which determines how many more to issue.
pub(crate) async fn fetch_all_events(
    fetcher: Arc<dyn UsagePageFetcher>,
    page_size: u64,
) -> Vec<UsageEvent> {
    if page_size == 0 {
        return Vec::new();
    }

    let first = match fetcher.fetch_page(1, page_size).await {
        Ok(page) => page,
        Err(err) => {
            tracing::warn!("Cursor usage fetch failed on first page: {err}");
            return Vec::new();
        }
    };

    let total_count = first.total_usage_events_count;
    let mut events = first.usage_events_display;
    let total_pages = total_count.div_ceil(page_size);

    if total_pages > 1 {
        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT_PAGES));
        let mut tasks = JoinSet::new();
        for page in 2..=total_pages {
            let fetcher = fetcher.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.ok();
                (page, fetcher.fetch_page(page, page_size).await)
            });
        }

        let mut pages = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page, Ok(result))) => pages.push((page, result.usage_events_display)),
                Ok((page, Err(err))) => {
                    tracing::debug!("Dropping failed Cursor page {page}: {err}");
                }
                Err(err) => tracing::debug!("Cursor page task failed: {err}"),
            }
        }

        // Join order is arbitrary; restore page order before flattening
        pages.sort_by_key(|(page, _)| *page);
        for (_, page_events) in pages {
            events.extend(page_events);
        }
    }

    events
}

/// Normalize raw events. The API reports output and cache traffic but no
/// input tokens, and carries its own pre-aggregated cost in cents.
fn parse_events(events: &[UsageEvent]) -> Vec<UsageEntry> {
    let mut entries = Vec::with_capacity(events.len());
    for event in events {
        let model = event
            .model
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let usage = event.token_usage.clone().unwrap_or_default();

        let output_tokens = usage.output_tokens.unwrap_or(0);
        let cache_creation_tokens = usage.cache_write_tokens.unwrap_or(0);
        let cache_read_tokens = usage.cache_read_tokens.unwrap_or(0);
        let total_tokens = output_tokens + cache_creation_tokens + cache_read_tokens;

        let cost = usage.total_cents.unwrap_or(0.0) / 100.0;

        // Epoch milliseconds as a string
        let timestamp = event
            .timestamp
            .as_deref()
            .and_then(parse_timestamp_str)
            .unwrap_or_else(Utc::now);

        entries.push(UsageEntry {
            id: format!("cursor-{}-{}", timestamp.timestamp_millis(), entries.len()),
            timestamp,
            provider: ProviderId::Cursor,
            model,
            input_tokens: 0,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
            total_tokens,
            cost,
            session_id: None,
            project_name: None,
        });
    }
    entries
}

// ---- Response Types ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsagePage {
    #[serde(default)]
    pub total_usage_events_count: u64,
    #[serde(default)]
    pub usage_events_display: Vec<UsageEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageEvent {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub token_usage: Option<EventTokenUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventTokenUsage {
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_write_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_tokens: Option<u64>,
    #[serde(default)]
    pub total_cents: Option<f64>,
}
