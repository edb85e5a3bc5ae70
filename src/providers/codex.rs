//! Codex provider
//!
//! Parses turn-based session logs: `turn_context` records update the model
//! in effect, `token_count` events carry per-turn usage deltas. Every event
//! is accumulated; deltas are already non-cumulative, so there is no
//! deduplication.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{parse_timestamp, ProviderFetcher, ProviderId, UsageEntry};
use crate::discovery::{self, CODEX_SCAN_DEPTH};
use crate::pricing::{self, PricingTable, CODEX_MODEL_ALIASES, CODEX_PRICE_PREFIXES};

/// Model assumed until a turn context names one
const DEFAULT_MODEL: &str = "gpt-4";

pub struct CodexProvider {
    root: Option<PathBuf>,
}

impl CodexProvider {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Override the Codex home instead of resolving it from the environment
    pub fn with_root(root: PathBuf) -> Self {
        Self { root: Some(root) }
    }

    fn root(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => discovery::codex_root(),
        }
    }

    async fn parse_file(path: &Path, pricing: &PricingTable) -> Vec<UsageEntry> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!("Skipping unreadable Codex log {:?}: {err}", path);
                return Vec::new();
            }
        };

        let session_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut current_model = DEFAULT_MODEL.to_string();
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

            match record.kind.as_deref() {
                Some("turn_context") => {
                    if let Some(model) = record.payload.as_ref().and_then(|p| p.model.clone()) {
                        current_model = model;
                    }
                }
                Some("event_msg") => {
                    let Some(payload) = &record.payload else {
                        continue;
                    };
                    if payload.kind.as_deref() != Some("token_count") {
                        continue;
                    }
                    let Some(usage) = payload
                        .info
                        .as_ref()
                        .and_then(|info| info.last_token_usage.as_ref())
                    else {
                        continue;
                    };

                    let total_tokens = usage.total_tokens.unwrap_or(0);
                    if total_tokens == 0 {
                        continue;
                    }

                    let input_tokens = usage.input_tokens.unwrap_or(0);
                    let output_tokens = usage.output_tokens.unwrap_or(0);
                    let cached_input_tokens = usage.cached_input_tokens.unwrap_or(0);

                    let cost = pricing::resolve(
                        pricing,
                        &current_model,
                        CODEX_PRICE_PREFIXES,
                        CODEX_MODEL_ALIASES,
                    )
                    .map(|rates| {
                        pricing::cost_usd_cached_input(
                            rates,
                            input_tokens,
                            cached_input_tokens,
                            output_tokens,
                        )
                    })
                    .unwrap_or(0.0);

                    let timestamp = record
                        .timestamp
                        .as_ref()
                        .and_then(parse_timestamp)
                        .unwrap_or_else(Utc::now);

                    entries.push(UsageEntry {
                        id: format!("codex-{session_id}-{}", entries.len()),
                        timestamp,
                        provider: ProviderId::Codex,
                        model: current_model.clone(),
                        input_tokens,
                        output_tokens,
                        cache_creation_tokens: 0,
                        cache_read_tokens: cached_input_tokens,
                        total_tokens,
                        cost,
                        session_id: Some(session_id.clone()),
                        project_name: None,
                    });
                }
                _ => {}
            }
        }

        entries
    }
}

impl Default for CodexProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderFetcher for CodexProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Codex
    }

    async fn fetch_entries(
        &self,
        pricing: &PricingTable,
    ) -> Result<Vec<UsageEntry>, anyhow::Error> {
        let files = discovery::find_log_files(&self.root(), CODEX_SCAN_DEPTH).await;

        let mut entries = Vec::new();
        for file in &files {
            entries.extend(Self::parse_file(file, pricing).await);
        }

        tracing::debug!(
            files = files.len(),
            entries = entries.len(),
            "Collected Codex usage"
        );
        Ok(entries)
    }
}

// ---- Log record types ----

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    // String in current logs, epoch seconds in older ones
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default)]
    payload: Option<LogPayload>,
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    info: Option<LogInfo>,
}

#[derive(Debug, Deserialize)]
struct LogInfo {
    #[serde(default)]
    last_token_usage: Option<LogTokenUsage>,
}

#[derive(Debug, Deserialize)]
struct LogTokenUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    cached_input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}
