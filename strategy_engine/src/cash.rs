use domain::{
    resolve_target_class, validate_targets, AllocationTarget, AssetClass, EngineError,
    EngineResult, PortfolioSnapshot,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashPurchase {
    pub symbol: String,
    pub asset: AssetClass,
    pub price: f64,
    pub current_value: f64,
    pub target_value: f64,
    pub buy_value: f64,
    pub buy_qty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashDeployment {
    pub cash: f64,
    pub total_before: f64,
    pub total_after: f64,
    pub purchases: Vec<CashPurchase>,
    pub skipped: Vec<EngineError>,
}

impl CashDeployment {
    pub fn total_buy_value(&self) -> f64 {
        self.purchases.iter().map(|p| p.buy_value).sum()
    }
}

/// Buy-only plan for putting `cash` to work: each target is topped up toward its share
/// of the enlarged portfolio, overweight targets are left untouched.
pub fn deploy_cash(
    snapshot: &PortfolioSnapshot,
    targets: &[AllocationTarget],
    gold_token: &AssetClass,
    cash: f64,
) -> EngineResult<CashDeployment> {
    validate_targets(targets)?;
    if !cash.is_finite() || cash < 0.0 {
        return Err(EngineError::Validation(format!(
            "cash amount must be a non-negative number, got {cash}"
        )));
    }

    let total_before = snapshot.total_valuation;
    let total_after = total_before + cash;
    let mut purchases = Vec::with_capacity(targets.len());
    let mut skipped = Vec::new();

    for target in targets {
        let asset = resolve_target_class(&target.symbol, gold_token);
        let position = snapshot.position(&asset);
        let price = position.and_then(|p| p.price).unwrap_or(0.0);
        if price <= 0.0 {
            warn!(symbol = %target.symbol, "no usable price for cash target, skipping");
            skipped.push(EngineError::ZeroPriceForTarget(target.symbol.clone()));
            continue;
        }
        let current_value = position.map(|p| p.valuation).unwrap_or(0.0);
        let target_value = total_after * target.percent / 100.0;
        let buy_value = (target_value - current_value).max(0.0);
        purchases.push(CashPurchase {
            symbol: target.symbol.clone(),
            asset,
            price,
            current_value,
            target_value,
            buy_value,
            buy_qty: buy_value / price,
        });
    }

    Ok(CashDeployment {
        cash,
        total_before,
        total_after,
        purchases,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{Position, ValuationStatus};
    use std::collections::BTreeMap;

    fn snapshot(items: &[(&str, f64, f64)]) -> PortfolioSnapshot {
        let positions: BTreeMap<AssetClass, Position> = items
            .iter()
            .map(|(asset, qty, price)| {
                let asset = AssetClass::new(asset);
                (
                    asset.clone(),
                    Position {
                        asset,
                        quantity: *qty,
                        price: Some(*price),
                        valuation: qty * price,
                        status: ValuationStatus::Priced,
                    },
                )
            })
            .collect();
        PortfolioSnapshot {
            cycle: 1,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
            total_valuation: positions.values().map(|p| p.valuation).sum(),
            positions,
            display_quantities: BTreeMap::new(),
        }
    }

    #[test]
    fn cash_goes_to_underweight_asset_only() {
        let snap = snapshot(&[("BTC", 0.1, 50000.0), ("PAXG", 1.0, 2000.0)]);
        let targets = vec![
            AllocationTarget::new("BTC", 50.0),
            AllocationTarget::new("GOLD", 50.0),
        ];

        let plan = deploy_cash(&snap, &targets, &AssetClass::new("PAXG"), 1000.0).unwrap();

        assert_eq!(plan.total_after, 8000.0);
        assert_eq!(plan.purchases[0].buy_value, 0.0);
        assert_eq!(plan.purchases[1].buy_value, 2000.0);
        assert_eq!(plan.purchases[1].buy_qty, 1.0);
    }

    #[test]
    fn balanced_portfolio_splits_cash_by_target() {
        let snap = snapshot(&[("BTC", 0.1, 50000.0), ("PAXG", 2.5, 2000.0)]);
        let targets = vec![
            AllocationTarget::new("BTC", 50.0),
            AllocationTarget::new("PAXG", 50.0),
        ];

        let plan = deploy_cash(&snap, &targets, &AssetClass::new("PAXG"), 1000.0).unwrap();

        assert_eq!(plan.purchases[0].buy_value, 500.0);
        assert_eq!(plan.purchases[1].buy_value, 500.0);
        assert_eq!(plan.total_buy_value(), 1000.0);
    }

    #[test]
    fn negative_cash_is_rejected() {
        let snap = snapshot(&[("BTC", 1.0, 50000.0)]);
        let targets = vec![AllocationTarget::new("BTC", 100.0)];

        let result = deploy_cash(&snap, &targets, &AssetClass::new("PAXG"), -5.0);

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn nan_target_is_rejected() {
        let snap = snapshot(&[("BTC", 1.0, 50000.0)]);
        let targets = vec![AllocationTarget::new("BTC", f64::NAN)];

        let result = deploy_cash(&snap, &targets, &AssetClass::new("PAXG"), 100.0);

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn unpriced_target_is_skipped() {
        let snap = snapshot(&[("BTC", 1.0, 50000.0)]);
        let targets = vec![
            AllocationTarget::new("BTC", 80.0),
            AllocationTarget::new("LINK", 20.0),
        ];

        let plan = deploy_cash(&snap, &targets, &AssetClass::new("PAXG"), 100.0).unwrap();

        assert_eq!(plan.purchases.len(), 1);
        assert_eq!(
            plan.skipped,
            vec![EngineError::ZeroPriceForTarget("LINK".to_string())]
        );
    }
}
