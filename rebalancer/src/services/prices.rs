use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use domain::{AssetClass, EngineError, EngineResult, HistoricalPoint, PriceQuote};
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_PRICE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_GOLD_FALLBACK_PRICE: f64 = 2650.0;

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;
    async fn price_usd(&self, asset: &AssetClass) -> Result<f64>;
}

/// Oldest-to-newest series for an asset class.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn history(&self, asset: &AssetClass, days: u32) -> Result<Vec<HistoricalPoint>>;
}

/// Ranked sources for one asset class plus an optional last-resort constant.
#[derive(Clone, Default)]
pub struct PriceRoute {
    sources: Vec<Arc<dyn PriceSource>>,
    hardcoded: Option<f64>,
}

impl PriceRoute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_fallback(mut self, price: f64) -> Self {
        self.hardcoded = Some(price);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceBoard {
    pub quotes: BTreeMap<AssetClass, PriceQuote>,
    pub missing: Vec<AssetClass>,
}

impl PriceBoard {
    pub fn price(&self, asset: &AssetClass) -> Option<f64> {
        self.quotes.get(asset).map(|q| q.price)
    }

    /// Units of `quote` one unit of `base` buys, e.g. BTC priced in gold.
    pub fn cross_rate(&self, base: &AssetClass, quote: &AssetClass) -> Option<f64> {
        cross_rate(self.price(base)?, self.price(quote)?)
    }
}

fn cross_rate(base_price: f64, quote_price: f64) -> Option<f64> {
    if quote_price > 0.0 && base_price > 0.0 {
        Some(base_price / quote_price)
    } else {
        None
    }
}

pub struct FallbackPriceOracle {
    routes: HashMap<AssetClass, PriceRoute>,
    default_route: PriceRoute,
    history: Option<Arc<dyn HistorySource>>,
    timeout: Duration,
}

impl FallbackPriceOracle {
    pub fn new(default_route: PriceRoute, timeout: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            default_route,
            history: None,
            timeout,
        }
    }

    pub fn with_route(mut self, asset: AssetClass, route: PriceRoute) -> Self {
        self.routes.insert(asset, route);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    fn route_for(&self, asset: &AssetClass) -> &PriceRoute {
        self.routes.get(asset).unwrap_or(&self.default_route)
    }

    /// First positive finite price along the asset's route wins. When every source
    /// fails the route's hardcoded constant is returned as a degraded quote.
    pub async fn get_price(&self, asset: &AssetClass) -> EngineResult<PriceQuote> {
        let route = self.route_for(asset);
        for source in &route.sources {
            let reason = match tokio::time::timeout(self.timeout, source.price_usd(asset)).await {
                Ok(Ok(price)) if price.is_finite() && price > 0.0 => {
                    debug!(asset = %asset, source = source.name(), price, "price resolved");
                    return Ok(PriceQuote {
                        asset: asset.clone(),
                        price,
                        source: source.name().to_string(),
                        degraded: false,
                    });
                }
                Ok(Ok(price)) => format!("unusable price {price}"),
                Ok(Err(err)) => format!("{err:#}"),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };
            let err = EngineError::SourceUnavailable {
                source_name: source.name().to_string(),
                asset: asset.to_string(),
                reason,
            };
            warn!(error = %err, asset = %asset, "price source failed, trying next");
        }

        if let Some(price) = route.hardcoded {
            warn!(asset = %asset, price, "all price sources failed, using hardcoded fallback");
            return Ok(PriceQuote {
                asset: asset.clone(),
                price,
                source: "hardcoded".to_string(),
                degraded: true,
            });
        }
        Err(EngineError::AllSourcesFailed(asset.to_string()))
    }

    pub async fn price_board<I>(&self, classes: I) -> PriceBoard
    where
        I: IntoIterator<Item = AssetClass>,
    {
        let classes: Vec<AssetClass> = classes.into_iter().collect();
        let results = join_all(classes.iter().map(|asset| self.get_price(asset))).await;

        let mut board = PriceBoard::default();
        for (asset, result) in classes.into_iter().zip(results) {
            match result {
                Ok(quote) => {
                    board.quotes.insert(asset, quote);
                }
                Err(err) => {
                    warn!(error = %err, asset = %asset, "price unresolved");
                    board.missing.push(asset);
                }
            }
        }
        board
    }

    /// Empty when no history source is configured or the lookup fails.
    pub async fn historical_series(&self, asset: &AssetClass, days: u32) -> Vec<HistoricalPoint> {
        let Some(history) = &self.history else {
            return Vec::new();
        };
        let mut points = match tokio::time::timeout(self.timeout, history.history(asset, days)).await
        {
            Ok(Ok(points)) => points,
            Ok(Err(err)) => {
                warn!(error = %err, asset = %asset, "price history unavailable");
                return Vec::new();
            }
            Err(_) => {
                warn!(asset = %asset, "price history timed out");
                return Vec::new();
            }
        };
        points.retain(|p| p.price.is_finite() && p.price > 0.0);
        points.sort_by_key(|p| p.timestamp);
        points
    }
}

#[derive(Clone)]
pub struct CoingeckoSource {
    pub(crate) client: Client,
    pub(crate) api_base: String,
    ids: HashMap<String, String>,
}

impl CoingeckoSource {
    pub fn new(client: Client, api_base: &str, ids: HashMap<String, String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            ids,
        }
    }

    pub fn coingecko_id(&self, asset: &AssetClass) -> String {
        let upper = asset.as_str();
        if let Some(mapped) = self.ids.get(upper) {
            return mapped.clone();
        }
        match upper {
            "BTC" => "bitcoin".to_string(),
            "WBTC" => "wrapped-bitcoin".to_string(),
            "PAXG" | "GOLD" => "pax-gold".to_string(),
            "XAUT" => "tether-gold".to_string(),
            "ETH" | "WETH" => "ethereum".to_string(),
            "USDC" => "usd-coin".to_string(),
            "USDT" => "tether".to_string(),
            "DAI" => "dai".to_string(),
            _ => upper.to_lowercase(),
        }
    }
}

#[async_trait]
impl PriceSource for CoingeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn price_usd(&self, asset: &AssetClass) -> Result<f64> {
        let id = self.coingecko_id(asset);
        let url = format!("{}/simple/price", self.api_base);
        let resp = self
            .client
            .get(url)
            .query(&[("ids", id.as_str()), ("vs_currencies", "usd")])
            .send()
            .await
            .context("coingecko request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("coingecko returned status {}", status));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to decode coingecko price response")?;
        body.get(&id)
            .and_then(|entry| entry.get("usd"))
            .and_then(|value| value.as_f64())
            .ok_or_else(|| anyhow::anyhow!("coingecko price missing for {asset} ({id})"))
    }
}

#[derive(Clone)]
pub struct CoinpaprikaSource {
    client: Client,
    api_base: String,
    ids: HashMap<String, String>,
}

impl CoinpaprikaSource {
    pub fn new(client: Client, api_base: &str) -> Self {
        let ids = [
            ("BTC", "btc-bitcoin"),
            ("PAXG", "paxg-pax-gold"),
            ("GOLD", "paxg-pax-gold"),
            ("XAUT", "xaut-tether-gold"),
        ]
        .into_iter()
        .map(|(symbol, id)| (symbol.to_string(), id.to_string()))
        .collect();
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            ids,
        }
    }
}

#[async_trait]
impl PriceSource for CoinpaprikaSource {
    fn name(&self) -> &str {
        "coinpaprika"
    }

    async fn price_usd(&self, asset: &AssetClass) -> Result<f64> {
        let id = self
            .ids
            .get(asset.as_str())
            .ok_or_else(|| anyhow::anyhow!("no coinpaprika id for {asset}"))?;
        let resp = self
            .client
            .get(format!("{}/tickers/{}", self.api_base, id))
            .send()
            .await
            .context("coinpaprika request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("coinpaprika returned status {}", status));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to decode coinpaprika ticker")?;
        body.pointer("/quotes/USD/price")
            .and_then(|value| value.as_f64())
            .ok_or_else(|| anyhow::anyhow!("coinpaprika price missing for {asset} ({id})"))
    }
}

/// Fixed price table; unknown symbols are an error so the route can move on.
#[derive(Clone, Default)]
pub struct StaticPriceSource {
    prices: HashMap<String, f64>,
}

impl StaticPriceSource {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        let prices = prices
            .into_iter()
            .map(|(symbol, price)| (symbol.trim().to_uppercase(), price))
            .collect();
        Self { prices }
    }

    /// The valuation currency itself, always 1.
    pub fn cash() -> Self {
        Self::new(HashMap::from([(AssetClass::usd().to_string(), 1.0)]))
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn price_usd(&self, asset: &AssetClass) -> Result<f64> {
        self.prices
            .get(asset.as_str())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no static price for {asset}"))
    }
}
