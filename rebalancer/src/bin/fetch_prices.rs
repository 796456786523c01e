use std::time::Duration;

use domain::AssetClass;
use rebalancer::{bootstrap::build_oracle, config::AppConfig, telemetry};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;
    let config = AppConfig::from_env()?;
    let symbols = std::env::var("PRICE_SYMBOLS").unwrap_or_else(|_| "BTC,PAXG".to_string());
    let days: u32 = std::env::var("PRICE_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);

    let gold_token = config.portfolio()?.gold_token;
    let oracle = build_oracle(&config, &gold_token)?;
    let classes: Vec<AssetClass> = symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(AssetClass::new)
        .collect();

    let mut report = Vec::with_capacity(classes.len());
    for asset in classes {
        let quote = oracle.get_price(&asset).await;
        let history = oracle.historical_series(&asset, days).await;
        tracing::info!(%asset, days, points = history.len(), "price history fetched");
        report.push(json!({
            "asset": asset,
            "quote": quote.as_ref().ok(),
            "error": quote.as_ref().err().map(|err| err.to_string()),
            "history_points": history.len(),
            "first": history.first(),
            "last": history.last(),
        }));
        // free API tiers rate-limit bursts
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
