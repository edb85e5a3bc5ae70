//! UsageDeck - AI usage aggregation core
//!
//! Collects per-call usage from Claude Code and Codex session logs and the
//! Cursor dashboard API, prices every record against the LiteLLM table, and
//! serves merged, filtered, paginated views to a hosting dashboard shell.

pub mod aggregator;
pub mod discovery;
pub mod pricing;
pub mod providers;
pub mod storage;

pub use aggregator::{AggregatedUsage, Aggregator, FilterMode};
pub use pricing::{ModelPricing, PricingCache, PricingTable};
pub use providers::{ProviderFetcher, ProviderId, UsageEntry};
pub use storage::{KeyringTokenProvider, SecureStorage, StaticTokenProvider, TokenProvider};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("usagedeck=info".parse().unwrap()),
        )
        .init();
}
