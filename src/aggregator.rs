//! Usage aggregation across providers
//!
//! Stateless request/response pipeline: collect entries from every active
//! provider, sort by recency, filter to the requested window, compute
//! totals, then paginate. One provider failing never disturbs the others.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::pricing::PricingCache;
use crate::providers::{
    ClaudeProvider, CodexProvider, CursorProvider, ProviderFetcher, ProviderId, UsageEntry,
};
use crate::storage::{KeyringTokenProvider, TokenProvider};

/// Time window applied to aggregated entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Entries since the hosting shell started
    Session,
    /// Entries since the first of the current calendar month, local time
    Monthly,
}

/// One page of aggregated usage plus whole-window totals.
///
/// `total_cost` and `total_count` describe the filtered set before
/// pagination; `entries` is the requested page of it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedUsage {
    pub entries: Vec<UsageEntry>,
    pub total_cost: f64,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub last_updated: DateTime<Utc>,
    pub filter_mode: FilterMode,
    pub window_start: DateTime<Utc>,
}

pub struct Aggregator {
    providers: Vec<Arc<dyn ProviderFetcher>>,
    pricing: Arc<PricingCache>,
    started_at: DateTime<Utc>,
}

impl Aggregator {
    /// Aggregator with the default provider set and keychain-backed tokens.
    /// `started_at` is the hosting shell's launch time; it anchors the
    /// `session` filter window.
    pub fn new(started_at: DateTime<Utc>) -> Self {
        let tokens: Arc<dyn TokenProvider> = Arc::new(KeyringTokenProvider::new());
        Self::with_parts(
            started_at,
            Arc::new(PricingCache::new()),
            vec![
                Arc::new(ClaudeProvider::new()),
                Arc::new(CodexProvider::new()),
                Arc::new(CursorProvider::new(tokens)),
            ],
        )
    }

    /// Aggregator from explicit parts
    pub fn with_parts(
        started_at: DateTime<Utc>,
        pricing: Arc<PricingCache>,
        providers: Vec<Arc<dyn ProviderFetcher>>,
    ) -> Self {
        Self {
            providers,
            pricing,
            started_at,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// One page of merged usage. An empty `provider_filter` means every
    /// provider. This call never fails; providers that fall over are logged
    /// and contribute nothing.
    pub async fn usages(
        &self,
        page: usize,
        page_size: usize,
        filter_mode: FilterMode,
        provider_filter: &[ProviderId],
    ) -> AggregatedUsage {
        let pricing = self.pricing.get().await;

        let mut tasks = JoinSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            if !provider_filter.is_empty() && !provider_filter.contains(&provider.id()) {
                continue;
            }
            let provider = provider.clone();
            let pricing = pricing.clone();
            tasks.spawn(async move {
                let id = provider.id();
                match provider.fetch_entries(&pricing).await {
                    Ok(entries) => (index, entries),
                    Err(err) => {
                        tracing::warn!("Provider {:?} pipeline failed: {err}", id);
                        (index, Vec::new())
                    }
                }
            });
        }

        let mut collected: Vec<(usize, Vec<UsageEntry>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => collected.push(result),
                Err(err) => tracing::warn!("Provider task failed: {err}"),
            }
        }
        // Re-assemble in fixed provider order so equal timestamps tie-break
        // the same way on every run
        collected.sort_by_key(|(index, _)| *index);

        let mut entries: Vec<UsageEntry> = collected
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let window_start = match filter_mode {
            FilterMode::Session => self.started_at,
            FilterMode::Monthly => start_of_month(),
        };
        entries.retain(|entry| entry.timestamp >= window_start);

        let total_cost = entries.iter().map(|entry| entry.cost).sum();
        let total_count = entries.len();
        let total_pages = if page_size == 0 {
            0
        } else {
            total_count.div_ceil(page_size)
        };

        let page = page.max(1);
        let start = (page - 1).saturating_mul(page_size);
        let page_entries: Vec<UsageEntry> =
            entries.into_iter().skip(start).take(page_size).collect();

        AggregatedUsage {
            entries: page_entries,
            total_cost,
            total_count,
            page,
            page_size,
            total_pages,
            last_updated: Utc::now(),
            filter_mode,
            window_start,
        }
    }
}

/// First instant of the current calendar month in local time
fn start_of_month() -> DateTime<Utc> {
    let today = Local::now().date_naive();
    let first = today.with_day(1).unwrap_or(today).and_time(NaiveTime::MIN);
    first
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{ModelPricing, PricingTable};
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn claude_line(timestamp: &str, message_id: &str, cost: f64) -> String {
        json!({
            "timestamp": timestamp,
            "costUSD": cost,
            "requestId": format!("req-{message_id}"),
            "message": {
                "id": message_id,
                "model": "claude-sonnet-4-5",
                "usage": { "input_tokens": 100, "output_tokens": 50 }
            }
        })
        .to_string()
    }

    fn codex_line(timestamp: &str, total: u64) -> String {
        json!({
            "type": "event_msg",
            "timestamp": timestamp,
            "payload": {
                "type": "token_count",
                "info": {
                    "last_token_usage": {
                        "input_tokens": total,
                        "output_tokens": 0,
                        "total_tokens": total
                    }
                }
            }
        })
        .to_string()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        fs::write(path, lines.join("\n")).expect("write log");
    }

    struct FailingProvider;

    #[async_trait]
    impl ProviderFetcher for FailingProvider {
        fn id(&self) -> ProviderId {
            ProviderId::Cursor
        }

        async fn fetch_entries(
            &self,
            _pricing: &PricingTable,
        ) -> Result<Vec<UsageEntry>, anyhow::Error> {
            Err(anyhow::anyhow!("endpoint on fire"))
        }
    }

    fn seeded_pricing() -> Arc<PricingCache> {
        let mut table = PricingTable::new();
        table.insert(
            "openai/gpt-4".to_string(),
            ModelPricing {
                input_cost_per_token: Some(1e-6),
                output_cost_per_token: Some(2e-6),
                cache_creation_input_token_cost: None,
                cache_read_input_token_cost: None,
            },
        );
        Arc::new(PricingCache::with_table(table))
    }

    fn test_aggregator(
        started_at: DateTime<Utc>,
        claude_root: &Path,
        codex_root: &Path,
    ) -> Aggregator {
        Aggregator::with_parts(
            started_at,
            seeded_pricing(),
            vec![
                Arc::new(ClaudeProvider::with_roots(vec![claude_root.to_path_buf()])),
                Arc::new(CodexProvider::with_root(codex_root.to_path_buf())),
                Arc::new(FailingProvider),
            ],
        )
    }

    fn seeded_dirs() -> (tempfile::TempDir, tempfile::TempDir) {
        let claude = tempfile::tempdir().expect("temp dir");
        let codex = tempfile::tempdir().expect("temp dir");

        let project = claude.path().join("proj");
        fs::create_dir_all(&project).expect("create dirs");
        write_lines(
            &project.join("s1.jsonl"),
            &[
                claude_line("2025-01-10T10:00:00Z", "m1", 0.5),
                claude_line("2025-01-12T10:00:00Z", "m2", 0.25),
            ],
        );

        let sessions = codex.path().join("sessions");
        fs::create_dir_all(&sessions).expect("create dirs");
        write_lines(
            &sessions.join("rollout-1.jsonl"),
            &[
                codex_line("2025-01-11T10:00:00Z", 1000),
                codex_line("2025-01-13T10:00:00Z", 2000),
            ],
        );

        (claude, codex)
    }

    fn past(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn merges_and_sorts_most_recent_first() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-01T00:00:00Z"), claude.path(), codex.path());

        let result = aggregator.usages(1, 50, FilterMode::Session, &[]).await;
        assert_eq!(result.total_count, 4);
        let stamps: Vec<_> = result.entries.iter().map(|entry| entry.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(stamps, sorted);
        assert_eq!(result.entries[0].provider, ProviderId::Codex);
    }

    #[tokio::test]
    async fn totals_cover_the_whole_window_regardless_of_page() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-01T00:00:00Z"), claude.path(), codex.path());

        let page1 = aggregator.usages(1, 2, FilterMode::Session, &[]).await;
        let page2 = aggregator.usages(2, 2, FilterMode::Session, &[]).await;

        assert_eq!(page1.entries.len(), 2);
        assert_eq!(page2.entries.len(), 2);
        assert_eq!(page1.total_count, 4);
        assert_eq!(page1.total_count, page2.total_count);
        assert!((page1.total_cost - page2.total_cost).abs() < 1e-12);
        assert_eq!(page1.total_pages, 2);

        let page3 = aggregator.usages(3, 2, FilterMode::Session, &[]).await;
        assert!(page3.entries.is_empty());
        assert_eq!(page3.total_count, 4);
    }

    #[tokio::test]
    async fn window_start_boundary_is_inclusive() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-12T10:00:00Z"), claude.path(), codex.path());

        let result = aggregator.usages(1, 50, FilterMode::Session, &[]).await;
        // m2 sits exactly on the boundary; only the later codex event joins it
        assert_eq!(result.total_count, 2);
        assert!(result
            .entries
            .iter()
            .any(|entry| entry.timestamp == result.window_start));
    }

    #[tokio::test]
    async fn provider_filter_limits_sources_and_empty_means_all() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-01T00:00:00Z"), claude.path(), codex.path());

        let only_claude = aggregator
            .usages(1, 50, FilterMode::Session, &[ProviderId::Claude])
            .await;
        assert_eq!(only_claude.total_count, 2);
        assert!(only_claude
            .entries
            .iter()
            .all(|entry| entry.provider == ProviderId::Claude));

        let all = aggregator.usages(1, 50, FilterMode::Session, &[]).await;
        assert_eq!(all.total_count, 4);
    }

    #[tokio::test]
    async fn identical_calls_return_identical_pages() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-01T00:00:00Z"), claude.path(), codex.path());

        let first = aggregator.usages(1, 50, FilterMode::Session, &[]).await;
        let second = aggregator.usages(1, 50, FilterMode::Session, &[]).await;

        let ids = |result: &AggregatedUsage| {
            result
                .entries
                .iter()
                .map(|entry| entry.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert!((first.total_cost - second.total_cost).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failing_provider_does_not_disturb_the_others() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-01T00:00:00Z"), claude.path(), codex.path());

        let result = aggregator
            .usages(1, 50, FilterMode::Session, &[ProviderId::Cursor])
            .await;
        assert_eq!(result.total_count, 0);
        assert_eq!(result.total_cost, 0.0);

        let everyone = aggregator.usages(1, 50, FilterMode::Session, &[]).await;
        assert_eq!(everyone.total_count, 4);
    }

    #[tokio::test]
    async fn claude_costs_come_from_embedded_values() {
        let (claude, codex) = seeded_dirs();
        let aggregator =
            test_aggregator(past("2025-01-01T00:00:00Z"), claude.path(), codex.path());

        let result = aggregator
            .usages(1, 50, FilterMode::Session, &[ProviderId::Claude])
            .await;
        assert!((result.total_cost - 0.75).abs() < 1e-12);
    }
}
