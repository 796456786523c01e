use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{AllocationTarget, AssetClass, BalanceTask, EngineError, EngineResult};

pub const DEFAULT_RPC_URL: &str = "https://polygon-rpc.com";
pub const DEFAULT_CHAIN_ID: u64 = 137;
pub const DEFAULT_GOLD_TOKEN: &str = "PAXG";
pub const DEFAULT_HISTORY_DAYS: u32 = 365;

pub const MAX_NATIVE_WALLETS: usize = 20;
pub const MAX_EVM_WALLETS: usize = 20;
pub const MAX_TOKENS: usize = 20;
pub const MAX_TARGETS: usize = 10;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TokenDefinition {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub contract: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    /// Known decimals; `None` means ask the contract.
    #[serde(default)]
    pub decimals: Option<u8>,
}

impl TokenDefinition {
    pub fn new(chain_id: u64, contract: &str, symbol: &str, name: &str) -> Self {
        Self {
            chain_id,
            contract: contract.trim().to_string(),
            symbol: symbol.trim().to_uppercase(),
            name: name.trim().to_string(),
            decimals: None,
        }
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = Some(decimals);
        self
    }

    /// Stablecoins, wrapped BTC and tokenized gold on Polygon.
    pub fn polygon_defaults() -> Vec<Self> {
        vec![
            Self::new(
                DEFAULT_CHAIN_ID,
                "0xc2132d05d31c914a87c6611c10748aeb04b58e8f",
                "USDT",
                "Tether USD",
            ),
            Self::new(
                DEFAULT_CHAIN_ID,
                "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
                "USDC",
                "USD Coin",
            ),
            Self::new(
                DEFAULT_CHAIN_ID,
                "0x8f3cf7ad23cd3cadbd9735aff958023239c6a063",
                "DAI",
                "Dai Stablecoin",
            ),
            Self::new(
                DEFAULT_CHAIN_ID,
                "0x1bfd67037b42cf73acf2047067bd4f2c47d9bfd6",
                "WBTC",
                "Wrapped BTC",
            ),
            Self::new(
                DEFAULT_CHAIN_ID,
                "0x553d3d295e0f695b9228246232edf400ed3560b5",
                "PAXG",
                "Paxos Gold",
            ),
        ]
    }
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct DeviationSettings {
    /// Smallest trade (in the valuation currency) worth its fees.
    pub fee_floor_usd: f64,
    /// Reported floor when the largest holding makes the fee floor irrelevant.
    pub reference_percent: f64,
}

impl Default for DeviationSettings {
    fn default() -> Self {
        Self {
            fee_floor_usd: 5.0,
            reference_percent: 1.5,
        }
    }
}

/// Everything the engine needs for one refresh, handed in by the caller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PortfolioConfig {
    pub rpc_url: String,
    pub chain_rpc_urls: BTreeMap<u64, String>,
    pub btc_addresses: Vec<String>,
    pub evm_addresses: Vec<String>,
    pub tokens: Vec<TokenDefinition>,
    pub targets: Vec<AllocationTarget>,
    pub gold_token: AssetClass,
    pub deviation: DeviationSettings,
    pub history_days: u32,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_rpc_urls: BTreeMap::new(),
            btc_addresses: Vec::new(),
            evm_addresses: Vec::new(),
            tokens: TokenDefinition::polygon_defaults(),
            targets: vec![
                AllocationTarget::new("BTC", 50.0),
                AllocationTarget::new(DEFAULT_GOLD_TOKEN, 50.0),
            ],
            gold_token: AssetClass::new(DEFAULT_GOLD_TOKEN),
            deviation: DeviationSettings::default(),
            history_days: DEFAULT_HISTORY_DAYS,
        }
    }
}

impl PortfolioConfig {
    pub fn validate(&self) -> EngineResult<()> {
        check_limit("bitcoin wallets", self.btc_addresses.len(), MAX_NATIVE_WALLETS)?;
        check_limit("evm wallets", self.evm_addresses.len(), MAX_EVM_WALLETS)?;
        check_limit("token contracts", self.tokens.len(), MAX_TOKENS)?;
        check_limit("allocation targets", self.targets.len(), MAX_TARGETS)?;
        if let Some(bad) = self
            .targets
            .iter()
            .find(|t| !t.percent.is_finite() || t.percent < 0.0)
        {
            return Err(EngineError::Validation(format!(
                "target {} has invalid percent {}",
                bad.symbol, bad.percent
            )));
        }
        if self.deviation.fee_floor_usd < 0.0 || self.deviation.reference_percent <= 0.0 {
            return Err(EngineError::Validation(
                "deviation settings must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint_for_chain(&self, chain_id: u64) -> &str {
        self.chain_rpc_urls
            .get(&chain_id)
            .map(String::as_str)
            .unwrap_or(self.rpc_url.as_str())
    }

    /// One task per non-blank bitcoin address and per (token, non-blank holder) pair.
    pub fn balance_tasks(&self) -> Vec<BalanceTask> {
        let mut tasks: Vec<BalanceTask> = non_blank(&self.btc_addresses)
            .map(BalanceTask::native)
            .collect();
        for token in self.tokens.iter().filter(|t| !t.contract.trim().is_empty()) {
            let endpoint = self.endpoint_for_chain(token.chain_id);
            for holder in non_blank(&self.evm_addresses) {
                tasks.push(BalanceTask::token(token.chain_id, endpoint, token, holder));
            }
        }
        tasks
    }

    /// Classes a refresh has to price: everything held, everything targeted,
    /// plus BTC and the gold token for the cross rate.
    pub fn priced_classes(&self) -> BTreeSet<AssetClass> {
        let mut classes = BTreeSet::new();
        classes.insert(AssetClass::btc());
        classes.insert(self.gold_token.clone());
        for token in &self.tokens {
            classes.insert(AssetClass::from_symbol(&token.symbol));
        }
        for target in &self.targets {
            classes.insert(resolve_target_class(&target.symbol, &self.gold_token));
        }
        classes
    }
}

/// `GOLD` points at the designated gold token; every other label goes through the
/// usual symbol normalization, so `BTC` covers wrapped BTC and `USD` the stablecoins.
pub fn resolve_target_class(symbol: &str, gold_token: &AssetClass) -> AssetClass {
    let class = AssetClass::from_symbol(symbol);
    if class == AssetClass::gold() {
        gold_token.clone()
    } else {
        class
    }
}

fn check_limit(what: &str, count: usize, max: usize) -> EngineResult<()> {
    if count > max {
        return Err(EngineError::Validation(format!(
            "too many {what}: {count} (max {max})"
        )));
    }
    Ok(())
}

fn non_blank(addresses: &[String]) -> impl Iterator<Item = &str> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
}
