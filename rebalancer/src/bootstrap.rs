use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use domain::{AssetClass, PortfolioConfig};
use indexer::BalanceAggregator;
use reqwest::Client;

use crate::{
    config::AppConfig,
    pipeline::RefreshCoordinator,
    services::{
        BitcoinBalanceSource, ChainBalanceSource, CoingeckoSource, CoinpaprikaSource,
        Erc20BalanceSource, FallbackPriceOracle, PriceRoute, StaticPriceSource,
    },
};

/// Routes: `USD` is fixed at 1, `BTC` has CoinGecko only, the gold token (and its
/// `GOLD` alias) has CoinGecko then CoinPaprika then the hardcoded price, and any other
/// symbol tries CoinGecko then the static `TOKEN_PRICES` table.
///
/// `gold_token` must be the one the engine plans with, so take it from the resolved
/// [`PortfolioConfig`] rather than the raw env value.
pub fn build_oracle(config: &AppConfig, gold_token: &AssetClass) -> Result<FallbackPriceOracle> {
    let client = Client::builder()
        .timeout(config.price_timeout)
        .build()
        .context("failed to build price http client")?;
    let coingecko = Arc::new(CoingeckoSource::new(
        client.clone(),
        &config.coingecko_api_base,
        config.token_price_ids.clone(),
    ));
    let coinpaprika = Arc::new(CoinpaprikaSource::new(client, &config.coinpaprika_api_base));
    let static_prices = Arc::new(StaticPriceSource::new(config.token_prices.clone()));

    let gold_route = PriceRoute::new()
        .then(coingecko.clone())
        .then(coinpaprika)
        .with_fallback(config.gold_fallback_price);
    let default_route = PriceRoute::new()
        .then(coingecko.clone())
        .then(static_prices);

    Ok(
        FallbackPriceOracle::new(default_route, config.price_timeout)
            .with_route(
                AssetClass::usd(),
                PriceRoute::new().then(Arc::new(StaticPriceSource::cash())),
            )
            .with_route(AssetClass::btc(), PriceRoute::new().then(coingecko.clone()))
            .with_route(gold_token.clone(), gold_route.clone())
            .with_route(AssetClass::gold(), gold_route)
            .with_history(coingecko),
    )
}

pub fn build_aggregator(config: &AppConfig) -> Result<BalanceAggregator> {
    let client = Client::builder()
        .timeout(config.balance_timeout)
        .build()
        .context("failed to build balance http client")?;
    let bitcoin = Arc::new(BitcoinBalanceSource::new(
        client,
        &config.blockstream_api_base,
        &config.blockchain_info_api_base,
    ));
    let erc20 = Arc::new(Erc20BalanceSource::new(Duration::from_millis(500)));
    Ok(BalanceAggregator::new(
        Arc::new(ChainBalanceSource::new(bitcoin, erc20)),
        config.balance_max_concurrency,
        config.balance_timeout,
    ))
}

pub fn build_coordinator(
    config: &AppConfig,
    portfolio: &PortfolioConfig,
) -> Result<RefreshCoordinator> {
    Ok(RefreshCoordinator::new(
        Arc::new(build_oracle(config, &portfolio.gold_token)?),
        build_aggregator(config)?,
    ))
}
