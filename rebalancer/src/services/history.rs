use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{AssetClass, HistoricalPoint};
use futures::future::join_all;

use super::prices::{CoingeckoSource, FallbackPriceOracle, HistorySource};

#[async_trait]
impl HistorySource for CoingeckoSource {
    async fn history(&self, asset: &AssetClass, days: u32) -> Result<Vec<HistoricalPoint>> {
        let id = self.coingecko_id(asset);
        let url = format!("{}/coins/{}/market_chart", self.api_base, id);
        let days_str = days.to_string();
        let resp = self
            .client
            .get(url)
            .query(&[
                ("vs_currency", "usd"),
                ("days", days_str.as_str()),
                ("interval", "daily"),
            ])
            .send()
            .await
            .context("coingecko market_chart request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("coingecko market_chart status {}", status));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .context("decode market_chart response failed")?;
        parse_market_chart(&body)
    }
}

/// `prices` is an array of `[timestamp_ms, price]` pairs; malformed pairs are dropped.
pub fn parse_market_chart(body: &serde_json::Value) -> Result<Vec<HistoricalPoint>> {
    let prices = body
        .get("prices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("coingecko market_chart missing prices"))?;

    let mut points = Vec::with_capacity(prices.len());
    for entry in prices {
        if let Some(arr) = entry.as_array() {
            if arr.len() >= 2 {
                if let (Some(ts_ms), Some(price)) = (arr[0].as_i64(), arr[1].as_f64()) {
                    if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(ts_ms) {
                        points.push(HistoricalPoint {
                            timestamp: ts,
                            price,
                        });
                    }
                }
            }
        }
    }
    Ok(points)
}

/// Fetches every class's series concurrently; classes without data are left out.
pub async fn load_histories(
    oracle: &FallbackPriceOracle,
    classes: &[AssetClass],
    days: u32,
) -> BTreeMap<AssetClass, Vec<HistoricalPoint>> {
    let series = join_all(
        classes
            .iter()
            .map(|asset| oracle.historical_series(asset, days)),
    )
    .await;
    classes
        .iter()
        .cloned()
        .zip(series)
        .filter(|(_, points)| !points.is_empty())
        .collect()
}
