//! Polymarket Data API Integration
//!
//! Trade feed and per-wallet position history, behind the
//! [`MarketDataSource`] seam so the pipeline can be driven without network.

use crate::models::TradeEvent;
use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSED_POSITIONS: &str = "closed-positions";
const OPEN_POSITIONS: &str = "positions";

/// Upstream reads needed by the pipeline.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Most recent trades, newest first. Records that do not match the
    /// [`TradeEvent`] shape fail the whole call.
    async fn recent_trades(&self, limit: usize, min_size: f64) -> Result<Vec<TradeEvent>>;

    /// Closed then open positions of `user`, as raw records.
    async fn position_history(&self, user: &str, limit: usize) -> Result<Vec<Value>>;
}

/// Rate limiter to respect API limits
struct RateLimiter {
    requests_per_10s: u32,
    current_requests: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new(requests_per_10s: u32) -> Self {
        Self {
            requests_per_10s,
            current_requests: 0,
            window_start: Instant::now(),
        }
    }

    async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();

        if elapsed >= Duration::from_secs(10) {
            self.current_requests = 0;
            self.window_start = Instant::now();
        } else if self.current_requests >= self.requests_per_10s {
            let wait_time = Duration::from_secs(10) - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time.as_millis());
            sleep(wait_time).await;
            self.current_requests = 0;
            self.window_start = Instant::now();
        }

        self.current_requests += 1;
    }
}

pub struct PolymarketDataClient {
    client: Client,
    base_url: String,
    limiter: Mutex<RateLimiter>,
}

impl PolymarketDataClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .user_agent("EdgeWatch/0.1 (Significance Scanner)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: Mutex::new(RateLimiter::new(200)), // 200/10s
        })
    }

    /// Fetch recent trades from `/trades`
    pub async fn fetch_trades(&self, limit: usize, min_size: f64) -> Result<Vec<TradeEvent>> {
        let url = format!("{}/trades", self.base_url);
        let params = [
            ("limit", limit.to_string()),
            ("filterType", "TOKENS".to_string()),
            ("filterAmount", min_size.to_string()),
        ];

        let response = self.execute_with_retry(&url, &params).await?;
        let trades: Vec<TradeEvent> = response
            .json()
            .await
            .context("Failed to parse trades response")?;

        debug!("Fetched {} trades", trades.len());
        Ok(trades)
    }

    /// Query for one page of a wallet's positions. Closed positions are
    /// requested newest first so the history order is stable across calls.
    fn position_params(endpoint: &str, user: &str, limit: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![("user", user.to_string()), ("limit", limit.to_string())];
        if endpoint == CLOSED_POSITIONS {
            params.push(("sortBy", "TIMESTAMP".to_string()));
            params.push(("sortDirection", "DESC".to_string()));
        }
        params
    }

    /// Fetch one page of a wallet's positions from `endpoint`.
    async fn fetch_positions(&self, endpoint: &str, user: &str, limit: usize) -> Result<Vec<Value>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let params = Self::position_params(endpoint, user, limit);

        let response = self.execute_with_retry(&url, &params).await?;
        let records: Vec<Value> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", endpoint))?;

        Ok(records)
    }

    /// Execute request with exponential backoff retry
    async fn execute_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            self.limiter.lock().await.acquire().await;

            let request = self.client.get(url).query(params);

            match timeout(REQUEST_TIMEOUT, request.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        return Ok(response);
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!("Rate limited on attempt {}, backing off", attempt + 1);
                        sleep(Duration::from_millis(backoff * 10)).await;
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        error!("API error {}: {}", status, text);
                        bail!("API error {}: {}", status, text);
                    }
                }
                Ok(Err(e)) => {
                    warn!("Request failed (attempt {}): {}", attempt + 1, e);
                }
                Err(_) => {
                    warn!("Request timeout (attempt {})", attempt + 1);
                }
            }

            if attempt < MAX_RETRIES - 1 {
                debug!("Retrying in {}ms", backoff);
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30000);
            }
        }

        bail!("Max retries exceeded for {}", url)
    }
}

#[async_trait::async_trait]
impl MarketDataSource for PolymarketDataClient {
    async fn recent_trades(&self, limit: usize, min_size: f64) -> Result<Vec<TradeEvent>> {
        self.fetch_trades(limit, min_size).await
    }

    async fn position_history(&self, user: &str, limit: usize) -> Result<Vec<Value>> {
        let mut records = self.fetch_positions(CLOSED_POSITIONS, user, limit).await?;
        records.extend(self.fetch_positions(OPEN_POSITIONS, user, limit).await?);
        Ok(records)
    }
}
