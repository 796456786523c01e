use domain::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairLeg {
    Gold,
    Bitcoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairInput {
    pub gold_qty: f64,
    pub btc_qty: f64,
    pub gold_percent: f64,
    pub btc_percent: f64,
    /// Price of one BTC in gold units.
    pub btc_in_gold: f64,
    pub gold_price_usd: f64,
}

/// Two-asset rebalance measured in gold units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRebalance {
    pub total_gold_value: f64,
    pub target_gold_qty: f64,
    pub target_btc_qty: f64,
    pub target_gold_usd: f64,
    pub target_btc_usd: f64,
    pub sell: Option<PairLeg>,
    pub buy: Option<PairLeg>,
    /// In units of the sold asset.
    pub sell_amount: f64,
    /// In units of the bought asset.
    pub buy_amount: f64,
    pub btc_diff_percent: f64,
    pub diff_usd: f64,
}

pub fn rebalance_pair(input: &PairInput) -> EngineResult<PairRebalance> {
    let rate = input.btc_in_gold;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(EngineError::Validation(format!(
            "btc-in-gold rate must be positive, got {rate}"
        )));
    }

    let gold_value = input.gold_qty;
    let btc_value = input.btc_qty * rate;
    let total = gold_value + btc_value;
    let target_gold = total * input.gold_percent / 100.0;
    let target_btc = total * input.btc_percent / 100.0;
    let diff_gold = gold_value - target_gold;
    let diff_btc = btc_value - target_btc;

    let (sell, buy, sell_amount, buy_amount) = if diff_gold > 0.0 {
        (
            Some(PairLeg::Gold),
            Some(PairLeg::Bitcoin),
            diff_gold,
            diff_gold / rate,
        )
    } else if diff_btc > 0.0 {
        (
            Some(PairLeg::Bitcoin),
            Some(PairLeg::Gold),
            diff_btc / rate,
            diff_btc,
        )
    } else {
        (None, None, 0.0, 0.0)
    };

    let btc_diff_percent = if target_btc != 0.0 {
        diff_btc / target_btc * 100.0
    } else {
        0.0
    };

    Ok(PairRebalance {
        total_gold_value: total,
        target_gold_qty: target_gold,
        target_btc_qty: target_btc / rate,
        target_gold_usd: target_gold * input.gold_price_usd,
        target_btc_usd: target_btc * input.gold_price_usd,
        sell,
        buy,
        sell_amount,
        buy_amount,
        btc_diff_percent,
        diff_usd: diff_btc.abs() * input.gold_price_usd,
    })
}
