use domain::{
    resolve_target_class, validate_targets, Action, AllocationTarget, AssetClass, EngineError,
    EngineResult, PortfolioSnapshot, RebalanceInstruction,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::deviation::{DeviationAdvisor, IdealDeviation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Suitable,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suitability {
    pub verdict: Verdict,
    pub max_deviation: f64,
    pub ideal: IdealDeviation,
    pub message: String,
}

impl Suitability {
    pub fn assess(max_deviation: f64, ideal: IdealDeviation) -> Self {
        let (verdict, message) = match ideal.threshold() {
            Some(threshold) if max_deviation >= threshold => (
                Verdict::Suitable,
                format!("suitable to execute: deviation {max_deviation:.2}%, ideal {ideal}"),
            ),
            _ => (
                Verdict::Wait,
                format!(
                    "below ideal threshold, consider waiting: deviation {max_deviation:.2}%, ideal {ideal}"
                ),
            ),
        };
        Self {
            verdict,
            max_deviation,
            ideal,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub total_valuation: f64,
    pub instructions: Vec<RebalanceInstruction>,
    /// Targets left out because their class has no usable price.
    pub skipped: Vec<EngineError>,
    pub max_deviation: f64,
    pub suitability: Suitability,
}

#[derive(Debug, Clone, Copy)]
pub struct RebalancePlanner<'a> {
    gold_token: &'a AssetClass,
    advisor: DeviationAdvisor,
}

impl<'a> RebalancePlanner<'a> {
    pub fn new(gold_token: &'a AssetClass, advisor: DeviationAdvisor) -> Self {
        Self { gold_token, advisor }
    }

    /// Buy/sell instructions toward `targets`. Fails without a partial plan when the
    /// targets do not add up to 100.
    pub fn plan(
        &self,
        snapshot: &PortfolioSnapshot,
        targets: &[AllocationTarget],
    ) -> EngineResult<RebalancePlan> {
        validate_targets(targets)?;

        let total = snapshot.total_valuation;
        let mut instructions = Vec::with_capacity(targets.len());
        let mut skipped = Vec::new();

        for target in targets {
            let asset = resolve_target_class(&target.symbol, self.gold_token);
            let position = snapshot.position(&asset);
            let price = position.and_then(|p| p.price).unwrap_or(0.0);
            if price <= 0.0 {
                warn!(
                    symbol = %target.symbol,
                    asset = %asset,
                    "no usable price for target, skipping"
                );
                skipped.push(EngineError::ZeroPriceForTarget(target.symbol.clone()));
                continue;
            }

            let current_qty = position.map(|p| p.quantity).unwrap_or(0.0);
            let current_value = position.map(|p| p.valuation).unwrap_or(0.0);
            let target_value = total * target.percent / 100.0;
            let target_qty = target_value / price;
            let delta_qty = target_qty - current_qty;
            let current_percent = if total > 0.0 {
                current_value / total * 100.0
            } else {
                0.0
            };

            instructions.push(RebalanceInstruction {
                symbol: target.symbol.clone(),
                asset,
                price,
                current_qty,
                current_value,
                current_percent,
                target_percent: target.percent,
                target_qty,
                target_value,
                delta_qty,
                delta_value: target_value - current_value,
                action: Action::from_delta(delta_qty),
            });
        }

        let max_deviation = instructions
            .iter()
            .map(|i| (i.current_percent - i.target_percent).abs())
            .fold(0.0, f64::max);
        let suitability = Suitability::assess(max_deviation, self.advisor.evaluate(snapshot));

        Ok(RebalancePlan {
            total_valuation: total,
            instructions,
            skipped,
            max_deviation,
            suitability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{Position, ValuationStatus};
    use std::collections::BTreeMap;

    fn position(asset: &str, quantity: f64, price: Option<f64>) -> (AssetClass, Position) {
        let asset = AssetClass::new(asset);
        (
            asset.clone(),
            Position {
                asset,
                quantity,
                price,
                valuation: quantity * price.unwrap_or(0.0),
                status: if price.is_some() {
                    ValuationStatus::Priced
                } else {
                    ValuationStatus::Unavailable
                },
            },
        )
    }

    fn snapshot(positions: Vec<(AssetClass, Position)>) -> PortfolioSnapshot {
        let positions: BTreeMap<_, _> = positions.into_iter().collect();
        PortfolioSnapshot {
            cycle: 1,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
            total_valuation: positions.values().map(|p| p.valuation).sum(),
            positions,
            display_quantities: BTreeMap::new(),
        }
    }

    fn gold() -> AssetClass {
        AssetClass::new("PAXG")
    }

    #[test]
    fn plan_covers_every_target_and_total() {
        let snap = snapshot(vec![
            position("BTC", 0.1, Some(60000.0)),
            position("PAXG", 1.0, Some(2000.0)),
            position("USD", 500.0, Some(1.0)),
        ]);
        let targets = vec![
            AllocationTarget::new("BTC", 50.0),
            AllocationTarget::new("GOLD", 30.0),
            AllocationTarget::new("USD", 20.0),
        ];
        let gold = gold();

        let plan = RebalancePlanner::new(&gold, DeviationAdvisor::default())
            .plan(&snap, &targets)
            .unwrap();

        assert_eq!(plan.instructions.len(), 3);
        let target_sum: f64 = plan.instructions.iter().map(|i| i.target_value).sum();
        assert!((target_sum - plan.total_valuation).abs() < 1e-9);

        let gold_leg = &plan.instructions[1];
        assert_eq!(gold_leg.symbol, "GOLD");
        assert_eq!(gold_leg.asset, gold);
        assert_eq!(gold_leg.price, 2000.0);

        for instruction in &plan.instructions {
            let expected = Action::from_delta(instruction.delta_qty);
            assert_eq!(instruction.action, expected);
            assert_eq!(instruction.delta_value.signum(), instruction.delta_qty.signum());
        }
    }

    #[test]
    fn targets_off_hundred_fail_without_instructions() {
        let snap = snapshot(vec![position("BTC", 1.0, Some(60000.0))]);
        let targets = vec![
            AllocationTarget::new("BTC", 60.0),
            AllocationTarget::new("GOLD", 30.0),
        ];
        let gold = gold();

        let result = RebalancePlanner::new(&gold, DeviationAdvisor::default()).plan(&snap, &targets);

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn nan_target_is_rejected() {
        let snap = snapshot(vec![position("BTC", 1.0, Some(60000.0))]);
        let gold = gold();

        let result = RebalancePlanner::new(&gold, DeviationAdvisor::default())
            .plan(&snap, &[AllocationTarget::new("BTC", f64::NAN)]);

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn zero_price_target_is_skipped() {
        let snap = snapshot(vec![
            position("BTC", 1.0, Some(60000.0)),
            position("LINK", 10.0, None),
        ]);
        let targets = vec![
            AllocationTarget::new("BTC", 70.0),
            AllocationTarget::new("LINK", 30.0),
        ];
        let gold = gold();

        let plan = RebalancePlanner::new(&gold, DeviationAdvisor::default())
            .plan(&snap, &targets)
            .unwrap();

        assert_eq!(plan.instructions.len(), 1);
        assert_eq!(
            plan.skipped,
            vec![EngineError::ZeroPriceForTarget("LINK".to_string())]
        );
        assert!((plan.max_deviation - 30.0).abs() < 1e-9);
    }

    #[test]
    fn balanced_portfolio_holds_and_waits() {
        let snap = snapshot(vec![
            position("BTC", 0.05, Some(60000.0)),
            position("PAXG", 1.5, Some(2000.0)),
        ]);
        let targets = vec![
            AllocationTarget::new("BTC", 50.0),
            AllocationTarget::new("PAXG", 50.0),
        ];
        let gold = gold();

        let plan = RebalancePlanner::new(&gold, DeviationAdvisor::default())
            .plan(&snap, &targets)
            .unwrap();

        assert!(plan.instructions.iter().all(|i| i.action == Action::Hold));
        assert_eq!(plan.max_deviation, 0.0);
        assert_eq!(plan.suitability.verdict, Verdict::Wait);
        assert_eq!(
            plan.suitability.ideal,
            IdealDeviation::ReferenceFloor { percent: 1.5 }
        );
    }

    #[test]
    fn drift_above_floor_is_suitable() {
        let snap = snapshot(vec![
            position("BTC", 0.1, Some(60000.0)),
            position("PAXG", 1.0, Some(2000.0)),
        ]);
        let targets = vec![
            AllocationTarget::new("BTC", 50.0),
            AllocationTarget::new("GOLD", 50.0),
        ];
        let gold = gold();

        let plan = RebalancePlanner::new(&gold, DeviationAdvisor::default())
            .plan(&snap, &targets)
            .unwrap();

        assert_eq!(plan.suitability.verdict, Verdict::Suitable);
        let btc = &plan.instructions[0];
        assert_eq!(btc.action, Action::Sell);
        assert!((btc.current_percent - 75.0).abs() < 1e-9);
        assert_eq!(plan.instructions[1].action, Action::Buy);
    }

    #[test]
    fn empty_portfolio_waits() {
        let snap = snapshot(vec![
            position("BTC", 0.0, Some(60000.0)),
            position("PAXG", 0.0, Some(2000.0)),
        ]);
        let targets = vec![
            AllocationTarget::new("BTC", 50.0),
            AllocationTarget::new("GOLD", 50.0),
        ];
        let gold = gold();

        let plan = RebalancePlanner::new(&gold, DeviationAdvisor::default())
            .plan(&snap, &targets)
            .unwrap();

        assert!(plan
            .instructions
            .iter()
            .all(|i| i.current_percent == 0.0 && i.action == Action::Hold));
        assert_eq!(plan.suitability.ideal, IdealDeviation::NoAssets);
        assert_eq!(plan.suitability.verdict, Verdict::Wait);
    }
}
