//! Network statistics and price data fetched from outside the index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use exploder_core::error::ExplorerError;

/// Blocks averaged per hashrate sample.
pub const HASHRATE_WINDOW: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashrateSample {
    pub height: u64,
    /// Estimated hashes per second.
    pub hashrate: f64,
}

/// Node able to estimate network hashrate.
#[async_trait]
pub trait HashrateSource: Send + Sync {
    async fn tip_height(&self) -> Result<u64, ExplorerError>;

    /// Hashes per second averaged over `window` blocks ending at `height`.
    async fn network_hashps(&self, window: u64, height: u64) -> Result<f64, ExplorerError>;
}

/// `limit` heights evenly spread from `tip` downwards, newest first.
pub fn sample_heights(tip: u64, limit: u64) -> Vec<u64> {
    if limit == 0 {
        return Vec::new();
    }
    let step = (tip.saturating_add(1) / limit).max(1);
    (0..limit)
        .map(|i| tip.saturating_sub(i.saturating_mul(step)))
        .collect()
}

/// Exactly `limit` hashrate samples below the upstream tip.
pub async fn sample_hashrates(
    source: &dyn HashrateSource,
    limit: u64,
) -> Result<Vec<HashrateSample>, ExplorerError> {
    let tip = source.tip_height().await?;
    let mut samples = Vec::with_capacity(limit as usize);
    for height in sample_heights(tip, limit) {
        let hashrate = source.network_hashps(HASHRATE_WINDOW, height).await?;
        samples.push(HashrateSample { height, hashrate });
    }
    Ok(samples)
}

/// Origin of price quotes.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self) -> Result<Value, ExplorerError>;
}

/// Fetches a JSON price object over HTTP.
pub struct HttpPriceSource {
    client: Client,
    url: String,
}

impl HttpPriceSource {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url,
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch(&self) -> Result<Value, ExplorerError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExplorerError::Upstream(format!("price feed: {e}")))?;
        resp.json()
            .await
            .map_err(|e| ExplorerError::Upstream(format!("price feed: {e}")))
    }
}

/// Price quotes cached for `ttl`.
///
/// When a refresh fails the last quote is served, however old.
pub struct PriceFeed {
    source: Arc<dyn PriceSource>,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Value)>>,
}

impl PriceFeed {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> Result<Value, ExplorerError> {
        if let Some(fresh) = self.cached(true) {
            return Ok(fresh);
        }
        match self.source.fetch().await {
            Ok(value) => {
                *self.cache.lock() = Some((Instant::now(), value.clone()));
                Ok(value)
            }
            Err(e) => match self.cached(false) {
                Some(stale) => {
                    warn!(error = %e, "price refresh failed, serving stale quote");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    fn cached(&self, fresh_only: bool) -> Option<Value> {
        let cache = self.cache.lock();
        cache
            .as_ref()
            .filter(|(at, _)| !fresh_only || at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }
}
