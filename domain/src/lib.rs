use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;

pub use config::{
    resolve_target_class, DeviationSettings, PortfolioConfig, TokenDefinition, DEFAULT_CHAIN_ID,
    DEFAULT_RPC_URL,
};

/// Currency every snapshot is valued in.
pub const VALUATION_CURRENCY: &str = "USD";

/// Stablecoins that collapse into the `USD` class at 1:1.
pub const STABLECOIN_SYMBOLS: [&str; 3] = ["USDT", "USDC", "DAI"];

/// (wrapped symbol, native class) pairs.
pub const WRAPPED_ASSETS: [(&str, &str); 1] = [("WBTC", "BTC")];

/// Absolute tolerance when checking that target percentages add up to 100.
pub const ALLOCATION_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineError {
    #[error("source {source_name} unavailable for {asset}: {reason}")]
    SourceUnavailable {
        source_name: String,
        asset: String,
        reason: String,
    },
    #[error("all price sources failed for {0}")]
    AllSourcesFailed(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no resolvable price for target {0}")]
    ZeroPriceForTarget(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Canonical grouping key for valuation and rebalancing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AssetClass(String);

impl AssetClass {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_uppercase())
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn btc() -> Self {
        Self::new("BTC")
    }

    pub fn gold() -> Self {
        Self::new("GOLD")
    }

    /// Maps a raw token/coin symbol onto the class it is valued and rebalanced as.
    /// Stablecoins become `USD`, wrapped assets become their native class, everything
    /// else keeps its own symbol.
    pub fn from_symbol(symbol: &str) -> Self {
        let upper = symbol.trim().to_uppercase();
        if STABLECOIN_SYMBOLS.contains(&upper.as_str()) {
            return Self::usd();
        }
        if let Some((_, native)) = WRAPPED_ASSETS.iter().find(|(wrapped, _)| *wrapped == upper) {
            return Self::new(native);
        }
        Self(upper)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cash(&self) -> bool {
        self.0 == "USD"
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AssetClass {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for AssetClass {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<AssetClass> for String {
    fn from(value: AssetClass) -> Self {
        value.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BalanceLookup {
    /// Bitcoin address balance, one external call.
    Native { address: String },
    /// ERC-20 `balanceOf(holder)` scaled by `decimals()`; `decimals` skips the second call
    /// when already known.
    Token {
        endpoint: String,
        contract: String,
        holder: String,
        decimals: Option<u8>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BalanceTask {
    pub source_id: String,
    pub symbol: String,
    pub lookup: BalanceLookup,
}

impl BalanceTask {
    pub fn native(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            source_id: format!("btc:{address}"),
            symbol: "BTC".to_string(),
            lookup: BalanceLookup::Native { address },
        }
    }

    pub fn token(
        chain_id: u64,
        endpoint: impl Into<String>,
        token: &TokenDefinition,
        holder: impl Into<String>,
    ) -> Self {
        let holder = holder.into();
        Self {
            source_id: format!("{chain_id}:{}:{holder}", token.contract.to_lowercase()),
            symbol: token.symbol.to_uppercase(),
            lookup: BalanceLookup::Token {
                endpoint: endpoint.into(),
                contract: token.contract.clone(),
                holder,
                decimals: token.decimals,
            },
        }
    }

    pub fn asset_class(&self) -> AssetClass {
        AssetClass::from_symbol(&self.symbol)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BalanceEntry {
    pub source_id: String,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub quantity: f64,
    /// Set when the lookup failed and the entry contributes zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BalanceEntry {
    pub fn ok(task: &BalanceTask, quantity: f64) -> Self {
        Self {
            source_id: task.source_id.clone(),
            symbol: task.symbol.clone(),
            asset_class: task.asset_class(),
            quantity,
            error: None,
        }
    }

    pub fn failed(task: &BalanceTask, reason: impl Into<String>) -> Self {
        Self {
            source_id: task.source_id.clone(),
            symbol: task.symbol.clone(),
            asset_class: task.asset_class(),
            quantity: 0.0,
            error: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PriceQuote {
    pub asset: AssetClass,
    pub price: f64,
    pub source: String,
    /// True when the price is a hardcoded fallback rather than a live source.
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct HistoricalPoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValuationStatus {
    Priced,
    Unavailable,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Position {
    pub asset: AssetClass,
    pub quantity: f64,
    pub price: Option<f64>,
    pub valuation: f64,
    pub status: ValuationStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub cycle: u64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub positions: BTreeMap<AssetClass, Position>,
    pub total_valuation: f64,
    /// Raw per-symbol quantities before class grouping (WBTC stays visible here).
    pub display_quantities: BTreeMap<String, f64>,
}

impl PortfolioSnapshot {
    pub fn position(&self, asset: &AssetClass) -> Option<&Position> {
        self.positions.get(asset)
    }

    pub fn display_quantity(&self, symbol: &str) -> f64 {
        self.display_quantities
            .get(&symbol.trim().to_uppercase())
            .copied()
            .unwrap_or(0.0)
    }

    /// Whole portfolio expressed in units of `asset` (e.g. BTC or gold ounces).
    pub fn total_in(&self, asset: &AssetClass) -> Option<f64> {
        let price = self.positions.get(asset)?.price?;
        if price > 0.0 {
            Some(self.total_valuation / price)
        } else {
            None
        }
    }

    pub fn nonzero_valuations(&self) -> impl Iterator<Item = (&AssetClass, f64)> + '_ {
        self.positions
            .iter()
            .filter(|(_, p)| p.valuation > 0.0)
            .map(|(asset, p)| (asset, p.valuation))
    }

    pub fn unavailable(&self) -> Vec<&AssetClass> {
        self.positions
            .iter()
            .filter(|(_, p)| p.status == ValuationStatus::Unavailable)
            .map(|(asset, _)| asset)
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AllocationTarget {
    pub symbol: String,
    pub percent: f64,
}

impl AllocationTarget {
    pub fn new(symbol: impl AsRef<str>, percent: f64) -> Self {
        Self {
            symbol: symbol.as_ref().trim().to_uppercase(),
            percent,
        }
    }
}

pub fn total_percent(targets: &[AllocationTarget]) -> f64 {
    targets.iter().map(|t| t.percent).sum()
}

/// Precondition shared by every allocation-driven planner.
pub fn validate_targets(targets: &[AllocationTarget]) -> EngineResult<()> {
    if targets.is_empty() {
        return Err(EngineError::Validation(
            "no allocation targets configured".to_string(),
        ));
    }
    if let Some(target) = targets.iter().find(|t| !t.percent.is_finite()) {
        return Err(EngineError::Validation(format!(
            "target {} has a non-finite percent",
            target.symbol
        )));
    }
    let sum = total_percent(targets);
    if !sum.is_finite() || (sum - 100.0).abs() > ALLOCATION_SUM_TOLERANCE {
        return Err(EngineError::Validation(format!(
            "target percentages sum to {sum}, expected 100"
        )));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn from_delta(delta_qty: f64) -> Self {
        if delta_qty > 0.0 {
            Action::Buy
        } else if delta_qty < 0.0 {
            Action::Sell
        } else {
            Action::Hold
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RebalanceInstruction {
    /// Target label as configured (e.g. `GOLD`).
    pub symbol: String,
    /// Snapshot class the label resolved to (e.g. `PAXG`).
    pub asset: AssetClass,
    pub price: f64,
    pub current_qty: f64,
    pub current_value: f64,
    pub current_percent: f64,
    pub target_percent: f64,
    pub target_qty: f64,
    pub target_value: f64,
    pub delta_qty: f64,
    pub delta_value: f64,
    pub action: Action,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GrowthWindow {
    Weekly,
    Monthly,
    Quarterly,
    SemiAnnual,
    NineMonths,
    Yearly,
}

impl GrowthWindow {
    pub const ALL: [GrowthWindow; 6] = [
        GrowthWindow::Weekly,
        GrowthWindow::Monthly,
        GrowthWindow::Quarterly,
        GrowthWindow::SemiAnnual,
        GrowthWindow::NineMonths,
        GrowthWindow::Yearly,
    ];

    pub fn days(self) -> i64 {
        match self {
            GrowthWindow::Weekly => 7,
            GrowthWindow::Monthly => 30,
            GrowthWindow::Quarterly => 90,
            GrowthWindow::SemiAnnual => 180,
            GrowthWindow::NineMonths => 270,
            GrowthWindow::Yearly => 365,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GrowthWindow::Weekly => "weekly",
            GrowthWindow::Monthly => "monthly",
            GrowthWindow::Quarterly => "quarterly",
            GrowthWindow::SemiAnnual => "semi_annual",
            GrowthWindow::NineMonths => "nine_months",
            GrowthWindow::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ValuePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GrowthReport {
    pub as_of: DateTime<Utc>,
    pub current_value: f64,
    pub windows: BTreeMap<GrowthWindow, f64>,
}

impl GrowthReport {
    pub fn growth(&self, window: GrowthWindow) -> Option<f64> {
        self.windows.get(&window).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stablecoins_collapse_into_usd() {
        for symbol in ["USDT", "usdc", " Dai "] {
            assert_eq!(AssetClass::from_symbol(symbol), AssetClass::usd());
        }
    }

    #[test]
    fn wrapped_btc_collapses_into_btc() {
        assert_eq!(AssetClass::from_symbol("wbtc"), AssetClass::btc());
        assert_eq!(AssetClass::from_symbol("BTC"), AssetClass::btc());
    }

    #[test]
    fn other_symbols_keep_their_label() {
        assert_eq!(AssetClass::from_symbol("paxg").as_str(), "PAXG");
        assert_eq!(AssetClass::from_symbol("LINK").as_str(), "LINK");
    }

    #[test]
    fn action_follows_delta_sign() {
        assert_eq!(Action::from_delta(0.5), Action::Buy);
        assert_eq!(Action::from_delta(-0.01), Action::Sell);
        assert_eq!(Action::from_delta(0.0), Action::Hold);
    }

    #[test]
    fn targets_must_sum_to_hundred() {
        let ok = vec![
            AllocationTarget::new("BTC", 60.0),
            AllocationTarget::new("GOLD", 40.0),
        ];
        assert!(validate_targets(&ok).is_ok());

        let short = vec![
            AllocationTarget::new("BTC", 60.0),
            AllocationTarget::new("GOLD", 30.0),
        ];
        assert!(matches!(
            validate_targets(&short),
            Err(EngineError::Validation(_))
        ));
        assert!(validate_targets(&[]).is_err());

        let nan = vec![AllocationTarget::new("BTC", f64::NAN)];
        assert!(matches!(
            validate_targets(&nan),
            Err(EngineError::Validation(_))
        ));
        let infinite = vec![
            AllocationTarget::new("BTC", f64::INFINITY),
            AllocationTarget::new("GOLD", f64::NEG_INFINITY),
        ];
        assert!(validate_targets(&infinite).is_err());
    }

    #[test]
    fn asset_class_deserializes_normalized() {
        let parsed: AssetClass = serde_json::from_str("\" btc \"").expect("should parse");
        assert_eq!(parsed, AssetClass::btc());
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"BTC\"");
    }

    #[test]
    fn growth_window_keys_serialize_as_labels() {
        let mut windows = BTreeMap::new();
        windows.insert(GrowthWindow::SemiAnnual, 1.5);
        let json = serde_json::to_string(&windows).unwrap();
        assert_eq!(json, r#"{"semi_annual":1.5}"#);
    }
}
