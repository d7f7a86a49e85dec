use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};
use url::Url;

use crate::CRYPTO_KEYWORDS;
use crate::config::SettingsConfig;
use crate::error::{FetchError, TrackerError};
use crate::types::Market;

/// Listing page size requested from the upstream.
const PAGE_SIZE: u32 = 100;

/// Odds assumed when the upstream carries no price at all.
const DEFAULT_ODDS: f64 = 50.0;

/// Source of the current crypto market universe.
///
/// Implementations fail soft: any transport or decode failure is logged and
/// yields an empty list, which callers treat as "no update available".
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch(&self) -> Vec<Market>;
}

/// One page of the upstream `/markets` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsPage {
    #[serde(default)]
    pub markets: Vec<UpstreamMarket>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Upstream market record; only the fields the tracker reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMarket {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ticker_symbol: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub close_price: Option<f64>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
}

impl UpstreamMarket {
    /// `ticker_symbol` when present, else `ticker`.
    pub fn ticker(&self) -> &str {
        self.ticker_symbol
            .as_deref()
            .or(self.ticker.as_deref())
            .unwrap_or_default()
    }

    /// Whether the ticker or title mentions any crypto keyword.
    pub fn is_crypto(&self) -> bool {
        let ticker = self.ticker().to_lowercase();
        let title = self.title.as_deref().unwrap_or_default().to_lowercase();
        CRYPTO_KEYWORDS
            .iter()
            .any(|kw| ticker.contains(kw) || title.contains(kw))
    }

    pub fn into_market(self, fetched_at: DateTime<Utc>) -> Market {
        let volume = self.volume.unwrap_or(0.0).max(0.0);
        let ticker = self.ticker().to_string();
        Market {
            id: self.id.filter(|id| !id.is_empty()),
            ticker,
            title: self.title.unwrap_or_default(),
            volume,
            close_price: self.close_price.or(self.value).unwrap_or(DEFAULT_ODDS),
            liquidity: self.liquidity.unwrap_or(0.0),
            status: self.status.unwrap_or_else(|| "open".to_string()),
            category: self.category_name,
            frequency: self.frequency,
            volume_millions: volume / 1_000_000.0,
            last_updated: fetched_at,
        }
    }
}

/// Keep crypto markets and convert them into cache entries.
pub fn filter_crypto(markets: Vec<UpstreamMarket>, fetched_at: DateTime<Utc>) -> Vec<Market> {
    markets
        .into_iter()
        .filter(UpstreamMarket::is_crypto)
        .map(|m| m.into_market(fetched_at))
        .collect()
}

/// REST client for the Kalshi market listing.
pub struct KalshiClient {
    http: Client,
    markets_url: Url,
    page_delay: Duration,
}

impl KalshiClient {
    pub fn new(settings: &SettingsConfig) -> Result<Self, TrackerError> {
        let base = settings.upstream_base_url.trim_end_matches('/');
        let markets_url = Url::parse(&format!("{base}/markets")).map_err(|source| {
            TrackerError::InvalidUpstreamUrl {
                url: settings.upstream_base_url.clone(),
                source,
            }
        })?;
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(TrackerError::HttpClient)?;
        Ok(Self {
            http,
            markets_url,
            page_delay: settings.page_delay(),
        })
    }

    /// Fetch one listing page of open markets.
    pub async fn fetch_page(&self, cursor: Option<&str>) -> Result<MarketsPage, FetchError> {
        let limit = PAGE_SIZE.to_string();
        let mut query = vec![("status", "open"), ("limit", limit.as_str())];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }

        let resp = self
            .http
            .get(self.markets_url.clone())
            .query(&query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Follow the cursor until it is empty or a page comes back empty.
    pub async fn fetch_all(&self) -> Result<Vec<UpstreamMarket>, FetchError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.fetch_page(cursor.as_deref()).await?;
            let count = page.markets.len();
            debug!("Fetched page of {count} markets");
            all.extend(page.markets);

            cursor = page.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || count == 0 {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }

        info!("Fetched a total of {} open markets from all pages", all.len());
        Ok(all)
    }
}

#[async_trait]
impl MarketSource for KalshiClient {
    async fn fetch(&self) -> Vec<Market> {
        match self.fetch_all().await {
            Ok(all) => {
                let crypto = filter_crypto(all, Utc::now());
                info!("Found {} crypto markets", crypto.len());
                crypto
            }
            Err(e) => {
                error!("Error fetching Kalshi data: {e}");
                Vec::new()
            }
        }
    }
}
