//! Model pricing from the community LiteLLM price table
//!
//! The table is fetched at most once per cache TTL. A stale table is served
//! when a refresh fails and an empty table is the last resort, so pricing
//! degrades to zero-cost entries instead of failing the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

pub const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

const PRICING_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Prefixes tried when resolving chat-assistant model names
pub const CLAUDE_PRICE_PREFIXES: &[&str] = &["claude/", "anthropic/"];

/// Prefixes tried when resolving code-gen model names
pub const CODEX_PRICE_PREFIXES: &[&str] = &["openai/", "azure/", "openrouter/openai/"];

/// Code-gen model variants priced under their base model
pub const CODEX_MODEL_ALIASES: &[(&str, &str)] = &[("gpt-5-codex", "gpt-5")];

/// Per-token cost components for one model; an absent component costs nothing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input_cost_per_token: Option<f64>,
    #[serde(default)]
    pub output_cost_per_token: Option<f64>,
    #[serde(default)]
    pub cache_creation_input_token_cost: Option<f64>,
    #[serde(default)]
    pub cache_read_input_token_cost: Option<f64>,
}

pub type PricingTable = HashMap<String, ModelPricing>;

struct CachedTable {
    table: Arc<PricingTable>,
    fetched_at: Instant,
}

/// Cached view of the remote price table
pub struct PricingCache {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    state: Mutex<Option<CachedTable>>,
}

impl PricingCache {
    pub fn new() -> Self {
        Self::with_url(LITELLM_PRICING_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.into(),
            ttl: PRICING_CACHE_TTL,
            state: Mutex::new(None),
        }
    }

    /// Cache pre-seeded with a fixed table; nothing is fetched until the TTL
    /// elapses. Useful for offline callers and tests.
    pub fn with_table(table: PricingTable) -> Self {
        let mut cache = Self::new();
        cache.state = Mutex::new(Some(CachedTable {
            table: Arc::new(table),
            fetched_at: Instant::now(),
        }));
        cache
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Current table: fresh cache, else a refetch, else whatever stale copy
    /// exists, else an empty table. Never fails.
    pub async fn get(&self) -> Arc<PricingTable> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.table.clone();
            }
        }

        match self.fetch().await {
            Ok(table) => {
                let table = Arc::new(table);
                *state = Some(CachedTable {
                    table: table.clone(),
                    fetched_at: Instant::now(),
                });
                table
            }
            Err(err) => match state.as_ref() {
                Some(cached) => {
                    tracing::warn!("Price table refresh failed, serving stale copy: {err}");
                    cached.table.clone()
                }
                None => {
                    tracing::warn!("Price table fetch failed: {err}");
                    Arc::new(PricingTable::new())
                }
            },
        }
    }

    async fn fetch(&self) -> Result<PricingTable, anyhow::Error> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Pricing endpoint returned status: {}",
                response.status()
            ));
        }

        // Entries that do not deserialize (the table carries a sample_spec
        // row with string placeholders) are skipped, not fatal.
        let raw: HashMap<String, serde_json::Value> = response.json().await?;
        let table = raw
            .into_iter()
            .filter_map(|(model, value)| {
                serde_json::from_value::<ModelPricing>(value)
                    .ok()
                    .map(|pricing| (model, pricing))
            })
            .collect();
        Ok(table)
    }
}

impl Default for PricingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up pricing for a model: exact key, then each prefix, then aliases
/// rewritten through the same prefixes, then a substring match. The first
/// strategy that yields a record wins.
pub fn resolve<'t>(
    table: &'t PricingTable,
    model: &str,
    prefixes: &[&str],
    aliases: &[(&str, &str)],
) -> Option<&'t ModelPricing> {
    if let Some(pricing) = table.get(model) {
        return Some(pricing);
    }

    for prefix in prefixes {
        if let Some(pricing) = table.get(&format!("{prefix}{model}")) {
            return Some(pricing);
        }
    }

    for (variant, base) in aliases {
        if *variant != model {
            continue;
        }
        for prefix in prefixes {
            if let Some(pricing) = table.get(&format!("{prefix}{base}")) {
                return Some(pricing);
            }
        }
    }

    substring_match(table, model, prefixes)
}

/// Last-resort fuzzy match. Table keys and reported model names often
/// disagree on date suffixes or provider prefixes. The longest matching key
/// wins, smallest key on equal length, so the pick is stable across runs.
fn substring_match<'t>(
    table: &'t PricingTable,
    model: &str,
    prefixes: &[&str],
) -> Option<&'t ModelPricing> {
    let mut best: Option<&str> = None;
    for key in table.keys() {
        let stripped = strip_known_prefix(key, prefixes);
        if !(key.contains(model) || model.contains(stripped)) {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => {
                key.len() > current.len() || (key.len() == current.len() && key.as_str() < current)
            }
        };
        if better {
            best = Some(key);
        }
    }
    best.and_then(|key| table.get(key))
}

fn strip_known_prefix<'k>(key: &'k str, prefixes: &[&str]) -> &'k str {
    for prefix in prefixes {
        if let Some(stripped) = key.strip_prefix(prefix) {
            return stripped;
        }
    }
    key
}

/// Cost for providers that report cache traffic alongside the full input
/// count. Cache rates fall back to the plain input rate when absent.
pub fn cost_usd(
    pricing: &ModelPricing,
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_tokens: u64,
    cache_read_tokens: u64,
) -> f64 {
    let input_rate = pricing.input_cost_per_token.unwrap_or(0.0);
    let output_rate = pricing.output_cost_per_token.unwrap_or(0.0);
    let cache_creation_rate = pricing.cache_creation_input_token_cost.unwrap_or(input_rate);
    let cache_read_rate = pricing.cache_read_input_token_cost.unwrap_or(input_rate);

    input_tokens as f64 * input_rate
        + output_tokens as f64 * output_rate
        + cache_creation_tokens as f64 * cache_creation_rate
        + cache_read_tokens as f64 * cache_read_rate
}

/// Cost for providers whose input count already includes cached tokens:
/// only the non-cached remainder is billed at the input rate.
pub fn cost_usd_cached_input(
    pricing: &ModelPricing,
    input_tokens: u64,
    cached_input_tokens: u64,
    output_tokens: u64,
) -> f64 {
    let input_rate = pricing.input_cost_per_token.unwrap_or(0.0);
    let output_rate = pricing.output_cost_per_token.unwrap_or(0.0);
    let cache_read_rate = pricing.cache_read_input_token_cost.unwrap_or(input_rate);

    let non_cached_input = input_tokens.saturating_sub(cached_input_tokens);

    non_cached_input as f64 * input_rate
        + cached_input_tokens as f64 * cache_read_rate
        + output_tokens as f64 * output_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(input: f64, output: f64) -> ModelPricing {
        ModelPricing {
            input_cost_per_token: Some(input),
            output_cost_per_token: Some(output),
            cache_creation_input_token_cost: None,
            cache_read_input_token_cost: None,
        }
    }

    #[test]
    fn resolves_exact_before_prefixed() {
        let mut table = PricingTable::new();
        table.insert("claude-sonnet-4-5".to_string(), pricing(1.0, 1.0));
        table.insert("claude/claude-sonnet-4-5".to_string(), pricing(2.0, 2.0));

        let found = resolve(&table, "claude-sonnet-4-5", CLAUDE_PRICE_PREFIXES, &[])
            .expect("pricing");
        assert_eq!(found.input_cost_per_token, Some(1.0));
    }

    #[test]
    fn resolves_through_provider_prefix() {
        let mut table = PricingTable::new();
        table.insert("anthropic/claude-opus-4-1".to_string(), pricing(3.0, 4.0));

        let found =
            resolve(&table, "claude-opus-4-1", CLAUDE_PRICE_PREFIXES, &[]).expect("pricing");
        assert_eq!(found.output_cost_per_token, Some(4.0));
    }

    #[test]
    fn resolves_codex_alias_through_prefixes() {
        let mut table = PricingTable::new();
        table.insert("openai/gpt-5".to_string(), pricing(2e-6, 8e-6));

        let found = resolve(
            &table,
            "gpt-5-codex",
            CODEX_PRICE_PREFIXES,
            CODEX_MODEL_ALIASES,
        )
        .expect("pricing");
        assert_eq!(found.input_cost_per_token, Some(2e-6));
    }

    #[test]
    fn substring_match_prefers_longest_key() {
        let mut table = PricingTable::new();
        table.insert("claude-3-5-sonnet".to_string(), pricing(1.0, 1.0));
        table.insert("claude-3-5-sonnet-20241022".to_string(), pricing(2.0, 2.0));

        let found =
            resolve(&table, "claude-3-5-sonnet-2024", CLAUDE_PRICE_PREFIXES, &[]).expect("pricing");
        assert_eq!(found.input_cost_per_token, Some(2.0));
    }

    #[test]
    fn substring_match_strips_prefix_for_reverse_containment() {
        let mut table = PricingTable::new();
        table.insert("claude/claude-sonnet".to_string(), pricing(5.0, 5.0));

        let found = resolve(
            &table,
            "claude-sonnet-4-5-20250929",
            CLAUDE_PRICE_PREFIXES,
            &[],
        )
        .expect("pricing");
        assert_eq!(found.input_cost_per_token, Some(5.0));
    }

    #[test]
    fn unknown_model_resolves_to_nothing() {
        let mut table = PricingTable::new();
        table.insert("gpt-4o".to_string(), pricing(1.0, 1.0));
        assert!(resolve(&table, "mystery-model", CLAUDE_PRICE_PREFIXES, &[]).is_none());
    }

    #[test]
    fn standard_cost_matches_rate_card() {
        let rates = pricing(0.000003, 0.000015);
        let cost = cost_usd(&rates, 1000, 500, 0, 0);
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn cache_rates_fall_back_to_input_rate() {
        let rates = pricing(2e-6, 1e-5);
        let cost = cost_usd(&rates, 0, 0, 100, 50);
        assert!((cost - 150.0 * 2e-6).abs() < 1e-12);
    }

    #[test]
    fn cached_input_cost_bills_only_the_non_cached_remainder() {
        let rates = pricing(0.000002, 0.000008);
        let cost = cost_usd_cached_input(&rates, 100, 40, 20);
        // 60 non-cached input + 40 cached at the input rate + 20 output
        assert!((cost - 0.00036).abs() < 1e-12);
    }

    #[test]
    fn cached_input_larger_than_input_never_goes_negative() {
        let rates = pricing(1e-6, 1e-6);
        let cost = cost_usd_cached_input(&rates, 10, 50, 0);
        assert!(cost >= 0.0);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty_table() {
        let cache = PricingCache::with_url("http://127.0.0.1:9/prices.json");
        let table = cache.get().await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn stale_table_is_served_when_refresh_fails() {
        let mut seeded = PricingTable::new();
        seeded.insert("claude-sonnet-4-5".to_string(), pricing(1.0, 2.0));

        // Zero TTL forces a refresh; the dead endpoint makes it fail
        let cache = PricingCache::with_table(seeded).with_ttl(Duration::from_secs(0));
        let cache = PricingCache {
            url: "http://127.0.0.1:9/prices.json".to_string(),
            ..cache
        };

        let table = cache.get().await;
        assert_eq!(
            table.get("claude-sonnet-4-5").and_then(|p| p.input_cost_per_token),
            Some(1.0)
        );
    }
}
