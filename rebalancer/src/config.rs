use std::{
    collections::{BTreeMap, HashMap},
    env, fs,
    time::Duration,
};

use anyhow::{Context, Result};
use domain::{
    config::DEFAULT_GOLD_TOKEN, AllocationTarget, AssetClass, DeviationSettings, PortfolioConfig,
    TokenDefinition, DEFAULT_CHAIN_ID, DEFAULT_RPC_URL,
};
use serde::Deserialize;

use crate::services::prices::{DEFAULT_GOLD_FALLBACK_PRICE, DEFAULT_PRICE_TIMEOUT};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub rpc_url: String,
    pub chain_rpc_urls: BTreeMap<u64, String>,
    pub btc_addresses: Vec<String>,
    pub evm_addresses: Vec<String>,
    pub erc20_tokens: Vec<TokenDefinition>,
    pub targets: Vec<AllocationTarget>,
    pub gold_token_symbol: String,
    pub coingecko_api_base: String,
    pub coinpaprika_api_base: String,
    pub blockstream_api_base: String,
    pub blockchain_info_api_base: String,
    pub token_price_ids: HashMap<String, String>,
    pub token_prices: HashMap<String, f64>,
    pub gold_fallback_price: f64,
    pub price_timeout: Duration,
    pub balance_timeout: Duration,
    pub balance_max_concurrency: usize,
    pub fee_floor_usd: f64,
    pub ideal_deviation_percent: f64,
    pub history_days: u32,
    pub refresh_interval: Duration,
    pub portfolio_config_path: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = PortfolioConfig::default();
        let erc20_tokens = match env::var("ERC20_TOKENS") {
            Ok(raw) => split_erc20_tokens(&raw),
            Err(_) => defaults.tokens,
        };
        let targets = match env::var("TARGET_ALLOCATIONS") {
            Ok(raw) => split_targets(&raw)?,
            Err(_) => defaults.targets,
        };

        Ok(Self {
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            chain_rpc_urls: parse_chain_urls("CHAIN_RPC_URLS"),
            btc_addresses: parse_list("BTC_ADDRESSES"),
            evm_addresses: parse_list("EVM_ADDRESSES"),
            erc20_tokens,
            targets,
            gold_token_symbol: env::var("GOLD_TOKEN_SYMBOL")
                .map(|v| v.trim().to_uppercase())
                .unwrap_or_else(|_| DEFAULT_GOLD_TOKEN.to_string()),
            coingecko_api_base: env::var("COINGECKO_API_BASE")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            coinpaprika_api_base: env::var("COINPAPRIKA_API_BASE")
                .unwrap_or_else(|_| "https://api.coinpaprika.com/v1".to_string()),
            blockstream_api_base: env::var("BLOCKSTREAM_API_BASE")
                .unwrap_or_else(|_| "https://blockstream.info/api".to_string()),
            blockchain_info_api_base: env::var("BLOCKCHAIN_INFO_API_BASE")
                .unwrap_or_else(|_| "https://blockchain.info".to_string()),
            token_price_ids: parse_token_price_ids("TOKEN_PRICE_IDS"),
            token_prices: parse_token_prices("TOKEN_PRICES"),
            gold_fallback_price: parse_f64("GOLD_FALLBACK_PRICE", DEFAULT_GOLD_FALLBACK_PRICE),
            price_timeout: parse_duration_seconds(
                "PRICE_TIMEOUT_SECS",
                DEFAULT_PRICE_TIMEOUT.as_secs(),
            ),
            balance_timeout: parse_duration_seconds(
                "BALANCE_TIMEOUT_SECS",
                indexer::DEFAULT_TASK_TIMEOUT.as_secs(),
            ),
            balance_max_concurrency: parse_usize(
                "BALANCE_MAX_CONCURRENCY",
                indexer::DEFAULT_MAX_CONCURRENCY,
            ),
            fee_floor_usd: parse_f64("FEE_FLOOR_USD", defaults.deviation.fee_floor_usd),
            ideal_deviation_percent: parse_f64(
                "IDEAL_DEVIATION_PERCENT",
                defaults.deviation.reference_percent,
            ),
            history_days: env::var("HISTORY_DAYS")
                .ok()
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|days| *days > 0)
                .unwrap_or(defaults.history_days),
            refresh_interval: parse_duration_seconds("REFRESH_INTERVAL_SECS", 900),
            portfolio_config_path: env::var("PORTFOLIO_CONFIG")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }

    /// Engine input for one refresh. Values from the `PORTFOLIO_CONFIG` file replace
    /// the corresponding env values.
    pub fn portfolio(&self) -> Result<PortfolioConfig> {
        let mut portfolio = PortfolioConfig {
            rpc_url: self.rpc_url.clone(),
            chain_rpc_urls: self.chain_rpc_urls.clone(),
            btc_addresses: self.btc_addresses.clone(),
            evm_addresses: self.evm_addresses.clone(),
            tokens: self.erc20_tokens.clone(),
            targets: self.targets.clone(),
            gold_token: AssetClass::new(&self.gold_token_symbol),
            deviation: DeviationSettings {
                fee_floor_usd: self.fee_floor_usd,
                reference_percent: self.ideal_deviation_percent,
            },
            history_days: self.history_days,
        };
        if let Some(path) = &self.portfolio_config_path {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read portfolio config {path}"))?;
            let file: PortfolioFile = serde_json::from_str(&raw)
                .with_context(|| format!("invalid portfolio config {path}"))?;
            file.apply(&mut portfolio);
        }
        portfolio.validate()?;
        Ok(portfolio)
    }
}

/// Wallets, tokens and targets kept outside the environment.
#[derive(Debug, Default, Deserialize)]
pub struct PortfolioFile {
    pub rpc_url: Option<String>,
    pub btc_addresses: Option<Vec<String>>,
    pub evm_addresses: Option<Vec<String>>,
    pub tokens: Option<Vec<TokenDefinition>>,
    pub targets: Option<Vec<AllocationTarget>>,
    pub gold_token: Option<String>,
}

impl PortfolioFile {
    pub fn apply(self, portfolio: &mut PortfolioConfig) {
        if let Some(rpc_url) = self.rpc_url.filter(|url| !url.trim().is_empty()) {
            portfolio.rpc_url = rpc_url;
        }
        if let Some(addresses) = self.btc_addresses {
            portfolio.btc_addresses = addresses;
        }
        if let Some(addresses) = self.evm_addresses {
            portfolio.evm_addresses = addresses;
        }
        if let Some(tokens) = self.tokens {
            portfolio.tokens = tokens
                .into_iter()
                .map(|mut token| {
                    token.symbol = token.symbol.trim().to_uppercase();
                    token
                })
                .collect();
        }
        if let Some(targets) = self.targets {
            portfolio.targets = targets
                .into_iter()
                .map(|t| AllocationTarget::new(&t.symbol, t.percent))
                .collect();
        }
        if let Some(gold) = self.gold_token {
            portfolio.gold_token = AssetClass::new(gold);
        }
    }
}

fn parse_duration_seconds(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(default)
}

fn parse_list(key: &str) -> Vec<String> {
    env::var(key).map(|raw| split_list(&raw)).unwrap_or_default()
}

fn parse_chain_urls(key: &str) -> BTreeMap<u64, String> {
    env::var(key)
        .map(|raw| split_chain_urls(&raw))
        .unwrap_or_default()
}

fn parse_token_prices(key: &str) -> HashMap<String, f64> {
    env::var(key)
        .map(|raw| split_token_prices(&raw))
        .unwrap_or_default()
}

fn parse_token_price_ids(key: &str) -> HashMap<String, String> {
    env::var(key)
        .map(|raw| split_token_price_ids(&raw))
        .unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// `SYMBOL:ADDRESS:DECIMALS:CHAIN[:NAME]`; decimals may be `auto` (ask the contract)
/// and the chain defaults to Polygon.
fn split_erc20_tokens(raw: &str) -> Vec<TokenDefinition> {
    raw.split(',')
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                return None;
            }
            let parts: Vec<_> = trimmed.split(':').map(str::trim).collect();
            if parts.len() < 2 {
                return None;
            }
            let symbol = parts[0];
            let address = parts[1];
            if symbol.is_empty() || address.is_empty() {
                return None;
            }
            let decimals = parts.get(2).and_then(|d| d.parse::<u8>().ok());
            let chain_id = parts
                .get(3)
                .and_then(|c| c.parse::<u64>().ok())
                .unwrap_or(DEFAULT_CHAIN_ID);
            let name = parts.get(4).copied().unwrap_or(symbol);
            let token = TokenDefinition::new(chain_id, address, symbol, name);
            Some(match decimals {
                Some(decimals) => token.with_decimals(decimals),
                None => token,
            })
        })
        .collect()
}

/// `BTC=50,PAXG=50`. A malformed percent is an error rather than a silently dropped target.
fn split_targets(raw: &str) -> Result<Vec<AllocationTarget>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| -> Result<AllocationTarget> {
            let (symbol, percent) = item
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("target {item:?} must look like SYMBOL=PERCENT"))?;
            let percent = percent
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid percent in target {item:?}"))?;
            if symbol.trim().is_empty() {
                anyhow::bail!("target {item:?} has no symbol");
            }
            Ok(AllocationTarget::new(symbol, percent))
        })
        .collect()
}

fn split_token_prices(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, value) = item.split_once('=')?;
            let price = value.trim().parse::<f64>().ok()?;
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return None;
            }
            Some((symbol, price))
        })
        .collect()
}

fn split_token_price_ids(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, id) = item.split_once(':')?;
            let symbol = symbol.trim().to_uppercase();
            let id = id.trim().to_lowercase();
            if symbol.is_empty() || id.is_empty() {
                return None;
            }
            Some((symbol, id))
        })
        .collect()
}

fn split_chain_urls(raw: &str) -> BTreeMap<u64, String> {
    raw.split(',')
        .filter_map(|item| {
            let (chain, url) = item.split_once('=')?;
            let chain_id = chain.trim().parse::<u64>().ok()?;
            let url = url.trim();
            if url.is_empty() {
                return None;
            }
            Some((chain_id, url.to_string()))
        })
        .collect()
}
