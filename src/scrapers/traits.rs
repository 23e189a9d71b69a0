use crate::scrapers::types::{Offer, RawPricePoint};
use anyhow::Result;
use async_trait::async_trait;

/// Common trait for upstream listing APIs.
/// Keeps the worker loop independent of the concrete transport and allows
/// additional sources to be wired in later.
#[async_trait]
pub trait OfferSource: Send + Sync {
    /// Runs one search request and returns the raw offer batch
    async fn search(&self, query: &[(String, String)]) -> Result<Vec<Offer>>;

    /// Fetches the full price timeline for one offer, oldest first
    async fn price_timeline(&self, offer_id: &str) -> Result<Vec<RawPricePoint>>;

    /// Get the name of the upstream source
    fn source_name(&self) -> &'static str;
}
