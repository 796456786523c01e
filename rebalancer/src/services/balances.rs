use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use domain::{BalanceLookup, BalanceTask};
use ethers::{
    contract::abigen,
    providers::{Http, Provider},
    types::Address,
    utils::format_units,
};
use indexer::BalanceSource;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

pub const SATOSHIS_PER_BTC: f64 = 100_000_000.0;

abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address owner) view returns (uint256)
        function decimals() view returns (uint8)
    ]"#,
);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{source_kind} cannot serve {lookup} lookups")]
    Unsupported {
        source_kind: &'static str,
        lookup: &'static str,
    },
    #[error("malformed balance response: {0}")]
    Malformed(String),
}

fn lookup_kind(lookup: &BalanceLookup) -> &'static str {
    match lookup {
        BalanceLookup::Native { .. } => "native",
        BalanceLookup::Token { .. } => "token",
    }
}

/// Bitcoin address balance: Blockstream first, blockchain.info second.
#[derive(Clone)]
pub struct BitcoinBalanceSource {
    client: Client,
    blockstream_base: String,
    blockchain_info_base: String,
}

impl BitcoinBalanceSource {
    pub fn new(client: Client, blockstream_base: &str, blockchain_info_base: &str) -> Self {
        Self {
            client,
            blockstream_base: blockstream_base.trim_end_matches('/').to_string(),
            blockchain_info_base: blockchain_info_base.trim_end_matches('/').to_string(),
        }
    }

    async fn blockstream(&self, address: &str) -> Result<f64> {
        let resp = self
            .client
            .get(format!("{}/address/{}", self.blockstream_base, address))
            .send()
            .await
            .context("blockstream request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("blockstream returned status {}", status));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to decode blockstream address")?;
        Ok(parse_blockstream_balance(&body)?)
    }

    async fn blockchain_info(&self, address: &str) -> Result<f64> {
        let resp = self
            .client
            .get(format!(
                "{}/q/addressbalance/{}",
                self.blockchain_info_base, address
            ))
            .send()
            .await
            .context("blockchain.info request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("blockchain.info returned status {}", status));
        }
        let text = resp
            .text()
            .await
            .context("failed to read blockchain.info body")?;
        Ok(parse_satoshi_text(&text)?)
    }
}

#[async_trait]
impl BalanceSource for BitcoinBalanceSource {
    async fn fetch_balance(&self, task: &BalanceTask) -> Result<f64> {
        let BalanceLookup::Native { address } = &task.lookup else {
            return Err(LookupError::Unsupported {
                source_kind: "bitcoin",
                lookup: lookup_kind(&task.lookup),
            }
            .into());
        };
        match self.blockstream(address).await {
            Ok(balance) => Ok(balance),
            Err(err) => {
                warn!(error = %err, %address, "blockstream lookup failed, trying blockchain.info");
                self.blockchain_info(address).await
            }
        }
    }
}

/// `chain_stats.funded_txo_sum - chain_stats.spent_txo_sum`, in BTC.
pub fn parse_blockstream_balance(body: &serde_json::Value) -> Result<f64, LookupError> {
    let stats = body
        .get("chain_stats")
        .ok_or_else(|| LookupError::Malformed("missing chain_stats".to_string()))?;
    let field = |name: &str| {
        stats
            .get(name)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| LookupError::Malformed(format!("missing chain_stats.{name}")))
    };
    Ok((field("funded_txo_sum")? - field("spent_txo_sum")?) / SATOSHIS_PER_BTC)
}

pub fn parse_satoshi_text(text: &str) -> Result<f64, LookupError> {
    text.trim()
        .parse::<f64>()
        .map(|sats| sats / SATOSHIS_PER_BTC)
        .map_err(|_| LookupError::Malformed(format!("not a satoshi amount: {text:?}")))
}

/// ERC-20 `balanceOf`, scaled by the configured or on-chain `decimals()`.
/// One provider is kept per endpoint.
pub struct Erc20BalanceSource {
    providers: RwLock<HashMap<String, Arc<Provider<Http>>>>,
    poll_interval: Duration,
}

impl Default for Erc20BalanceSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl Erc20BalanceSource {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            poll_interval,
        }
    }

    async fn provider(&self, endpoint: &str) -> Result<Arc<Provider<Http>>> {
        if let Some(provider) = self.providers.read().await.get(endpoint) {
            return Ok(provider.clone());
        }
        let provider = Arc::new(
            Provider::<Http>::try_from(endpoint)
                .with_context(|| format!("invalid rpc endpoint {endpoint}"))?
                .interval(self.poll_interval),
        );
        self.providers
            .write()
            .await
            .insert(endpoint.to_string(), provider.clone());
        Ok(provider)
    }
}

#[async_trait]
impl BalanceSource for Erc20BalanceSource {
    async fn fetch_balance(&self, task: &BalanceTask) -> Result<f64> {
        let BalanceLookup::Token {
            endpoint,
            contract,
            holder,
            decimals,
        } = &task.lookup
        else {
            return Err(LookupError::Unsupported {
                source_kind: "erc20",
                lookup: lookup_kind(&task.lookup),
            }
            .into());
        };

        let contract_address = Address::from_str(contract)
            .with_context(|| format!("invalid token contract {contract}"))?;
        let holder_address =
            Address::from_str(holder).with_context(|| format!("invalid holder address {holder}"))?;
        let token = Erc20Token::new(contract_address, self.provider(endpoint).await?);

        let raw = token
            .balance_of(holder_address)
            .call()
            .await
            .with_context(|| format!("balanceOf failed for {}", task.symbol))?;
        let decimals = match decimals {
            Some(decimals) => *decimals,
            None => token
                .decimals()
                .call()
                .await
                .with_context(|| format!("decimals failed for {}", task.symbol))?,
        };
        let amount: f64 = format_units(raw, decimals as i32)?
            .parse()
            .context("token amount is not a number")?;
        Ok(amount)
    }
}

/// Routes native lookups to the bitcoin source and token lookups to the ERC-20 source.
#[derive(Clone)]
pub struct ChainBalanceSource {
    native: Arc<dyn BalanceSource>,
    token: Arc<dyn BalanceSource>,
}

impl ChainBalanceSource {
    pub fn new(native: Arc<dyn BalanceSource>, token: Arc<dyn BalanceSource>) -> Self {
        Self { native, token }
    }
}

#[async_trait]
impl BalanceSource for ChainBalanceSource {
    async fn fetch_balance(&self, task: &BalanceTask) -> Result<f64> {
        match task.lookup {
            BalanceLookup::Native { .. } => self.native.fetch_balance(task).await,
            BalanceLookup::Token { .. } => self.token.fetch_balance(task).await,
        }
    }
}
