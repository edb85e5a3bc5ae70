//! Provider trait definition

use async_trait::async_trait;

use super::{ProviderId, UsageEntry};
use crate::pricing::PricingTable;

/// Trait for implementing a provider usage collector
#[async_trait]
pub trait ProviderFetcher: Send + Sync {
    /// Which provider this collector reports for
    fn id(&self) -> ProviderId;

    /// Collect every usage entry currently visible for this provider.
    ///
    /// Implementations degrade gracefully: unreadable files and failed
    /// requests shrink the result rather than surfacing here. An `Err` means
    /// the whole pipeline fell over and the provider contributes nothing.
    async fn fetch_entries(&self, pricing: &PricingTable)
        -> Result<Vec<UsageEntry>, anyhow::Error>;
}
