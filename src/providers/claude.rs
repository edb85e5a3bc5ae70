//! Claude Code provider
//!
//! Reads newline-delimited JSON session logs from the local projects
//! directories. Records are deduplicated across every file of a run by
//! message id + request id; records carrying a pre-computed cost keep it
//! instead of being re-priced.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{parse_timestamp_str, ProviderFetcher, ProviderId, UsageEntry};
use crate::discovery::{self, CLAUDE_SCAN_DEPTH};
use crate::pricing::{self, PricingTable, CLAUDE_PRICE_PREFIXES};

pub struct ClaudeProvider {
    roots: Option<Vec<PathBuf>>,
}

impl ClaudeProvider {
    pub fn new() -> Self {
        Self { roots: None }
    }

    /// Override the projects roots instead of resolving them from the
    /// environment
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots: Some(roots) }
    }

    fn roots(&self) -> Vec<PathBuf> {
        match &self.roots {
            Some(roots) => roots.clone(),
            None => discovery::claude_project_roots(),
        }
    }

    async fn parse_file(
        path: &Path,
        pricing: &PricingTable,
        seen: &mut HashSet<String>,
    ) -> Vec<UsageEntry> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!("Skipping unreadable Claude log {:?}: {err}", path);
                return Vec::new();
            }
        };

        let session_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_string();
        let project_name = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .map(str::to_string);

        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(_) => continue,
            };
            let Some(message) = &record.message else {
                continue;
            };
            let Some(usage) = &message.usage else {
                continue;
            };

            let input_tokens = usage.input_tokens.unwrap_or(0);
            let output_tokens = usage.output_tokens.unwrap_or(0);
            if input_tokens == 0 && output_tokens == 0 {
                continue;
            }

            // A record missing either id is never deduplicated
            if let (Some(message_id), Some(request_id)) = (&message.id, &record.request_id) {
                let key = format!("{message_id}:{request_id}");
                if !seen.insert(key) {
                    continue;
                }
            }

            let model = message
                .model
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let cache_creation_tokens = usage.cache_creation_input_tokens.unwrap_or(0);
            let cache_read_tokens = usage.cache_read_input_tokens.unwrap_or(0);
            let total_tokens =
                input_tokens + output_tokens + cache_creation_tokens + cache_read_tokens;

            let cost = record.cost_usd.unwrap_or_else(|| {
                pricing::resolve(pricing, &model, CLAUDE_PRICE_PREFIXES, &[])
                    .map(|rates| {
                        pricing::cost_usd(
                            rates,
                            input_tokens,
                            output_tokens,
                            cache_creation_tokens,
                            cache_read_tokens,
                        )
                    })
                    .unwrap_or(0.0)
            });

            let timestamp = record
                .timestamp
                .as_deref()
                .and_then(parse_timestamp_str)
                .unwrap_or_else(Utc::now);

            entries.push(UsageEntry {
                id: format!("claude-{session_id}-{}", entries.len()),
                timestamp,
                provider: ProviderId::Claude,
                model,
                input_tokens,
                output_tokens,
                cache_creation_tokens,
                cache_read_tokens,
                total_tokens,
                cost,
                session_id: Some(session_id.clone()),
                project_name: project_name.clone(),
            });
        }

        entries
    }
}

impl Default for ClaudeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderFetcher for ClaudeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Claude
    }

    async fn fetch_entries(
        &self,
        pricing: &PricingTable,
    ) -> Result<Vec<UsageEntry>, anyhow::Error> {
        let mut files = Vec::new();
        for root in self.roots() {
            files.extend(discovery::find_log_files(&root, CLAUDE_SCAN_DEPTH).await);
        }

        // Most recent file first, so the newest copy of a duplicated record
        // is the one that survives deduplication
        let count = files.len();
        let files = discovery::most_recent_files(files, count).await;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for file in &files {
            entries.extend(Self::parse_file(file, pricing, &mut seen).await);
        }

        tracing::debug!(
            files = files.len(),
            entries = entries.len(),
            "Collected Claude usage"
        );
        Ok(entries)
    }
}

// ---- Log record types ----

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default)]
    message: Option<LogMessage>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, rename = "costUSD")]
    cost_usd: Option<f64>,
    #[serde(default, rename = "requestId")]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<LogUsage>,
}

#[derive(Debug, Deserialize)]
struct LogUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}
