use std::fmt;

use domain::{DeviationSettings, PortfolioSnapshot};
use serde::{Deserialize, Serialize};

/// Minimum drift worth acting on, expressed as "X% or higher".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdealDeviation {
    /// The largest holding is big enough that the reference percent already covers fees.
    ReferenceFloor { percent: f64 },
    /// Smallest percent whose trade value still covers the fee floor.
    FeeCovering { percent: f64 },
    NoAssets,
}

impl IdealDeviation {
    pub fn threshold(&self) -> Option<f64> {
        match self {
            IdealDeviation::ReferenceFloor { percent } | IdealDeviation::FeeCovering { percent } => {
                Some(*percent)
            }
            IdealDeviation::NoAssets => None,
        }
    }
}

impl fmt::Display for IdealDeviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.threshold() {
            Some(percent) => write!(f, "{percent:.2}% or higher"),
            None => f.write_str("no assets to evaluate"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviationAdvisor {
    settings: DeviationSettings,
}

impl DeviationAdvisor {
    pub fn new(settings: DeviationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> DeviationSettings {
        self.settings
    }

    /// Largest class value when two or more classes are held, half the total for a
    /// single class, zero otherwise.
    pub fn base_value(snapshot: &PortfolioSnapshot) -> f64 {
        let values: Vec<f64> = snapshot.nonzero_valuations().map(|(_, v)| v).collect();
        match values.len() {
            0 => 0.0,
            1 => snapshot.total_valuation / 2.0,
            _ => values.into_iter().fold(0.0, f64::max),
        }
    }

    pub fn ideal_for_base(&self, base_value: f64) -> IdealDeviation {
        if !base_value.is_finite() || base_value <= 0.0 {
            return IdealDeviation::NoAssets;
        }
        let candidate = base_value * self.settings.reference_percent / 100.0;
        if candidate >= self.settings.fee_floor_usd {
            IdealDeviation::ReferenceFloor {
                percent: self.settings.reference_percent,
            }
        } else {
            IdealDeviation::FeeCovering {
                percent: round2(self.settings.fee_floor_usd / base_value * 100.0),
            }
        }
    }

    pub fn evaluate(&self, snapshot: &PortfolioSnapshot) -> IdealDeviation {
        self.ideal_for_base(Self::base_value(snapshot))
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{AssetClass, Position, ValuationStatus};
    use std::collections::BTreeMap;

    fn snapshot(values: &[(&str, f64)]) -> PortfolioSnapshot {
        let positions: BTreeMap<AssetClass, Position> = values
            .iter()
            .map(|(asset, value)| {
                let asset = AssetClass::new(asset);
                (
                    asset.clone(),
                    Position {
                        asset,
                        quantity: *value,
                        price: Some(1.0),
                        valuation: *value,
                        status: ValuationStatus::Priced,
                    },
                )
            })
            .collect();
        PortfolioSnapshot {
            cycle: 1,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
            total_valuation: values.iter().map(|(_, v)| v).sum(),
            positions,
            display_quantities: BTreeMap::new(),
        }
    }

    #[test]
    fn large_base_reports_reference_floor() {
        let advisor = DeviationAdvisor::default();
        let ideal = advisor.ideal_for_base(1000.0);
        assert_eq!(ideal, IdealDeviation::ReferenceFloor { percent: 1.5 });
        assert_eq!(ideal.to_string(), "1.50% or higher");
    }

    #[test]
    fn small_base_reports_fee_covering_percent() {
        let advisor = DeviationAdvisor::default();
        let ideal = advisor.ideal_for_base(100.0);
        assert_eq!(ideal, IdealDeviation::FeeCovering { percent: 5.0 });
        assert_eq!(ideal.to_string(), "5.00% or higher");
        assert_eq!(
            advisor.ideal_for_base(300.0),
            IdealDeviation::FeeCovering { percent: 1.67 }
        );
    }

    #[test]
    fn zero_base_has_no_assets() {
        let advisor = DeviationAdvisor::default();
        assert_eq!(advisor.ideal_for_base(0.0), IdealDeviation::NoAssets);
        assert_eq!(advisor.evaluate(&snapshot(&[])), IdealDeviation::NoAssets);
        assert_eq!(IdealDeviation::NoAssets.threshold(), None);
    }

    #[test]
    fn base_value_follows_concentration() {
        assert_eq!(
            DeviationAdvisor::base_value(&snapshot(&[("BTC", 700.0), ("PAXG", 300.0)])),
            700.0
        );
        assert_eq!(DeviationAdvisor::base_value(&snapshot(&[("BTC", 800.0)])), 400.0);
        assert_eq!(
            DeviationAdvisor::base_value(&snapshot(&[("BTC", 800.0), ("PAXG", 0.0)])),
            400.0
        );
    }

    #[test]
    fn three_percent_reference_with_five_dollar_floor() {
        let advisor = DeviationAdvisor::new(DeviationSettings {
            fee_floor_usd: 5.0,
            reference_percent: 3.0,
        });
        let ideal = advisor.ideal_for_base(1000.0);
        assert_eq!(ideal, IdealDeviation::ReferenceFloor { percent: 3.0 });
        assert_eq!(ideal.to_string(), "3.00% or higher");
        assert_eq!(
            advisor.ideal_for_base(100.0),
            IdealDeviation::FeeCovering { percent: 5.0 }
        );
    }

    #[test]
    fn custom_settings_apply() {
        let advisor = DeviationAdvisor::new(DeviationSettings {
            fee_floor_usd: 10.0,
            reference_percent: 3.0,
        });
        assert_eq!(
            advisor.ideal_for_base(1000.0),
            IdealDeviation::ReferenceFloor { percent: 3.0 }
        );
        assert_eq!(
            advisor.ideal_for_base(200.0),
            IdealDeviation::FeeCovering { percent: 5.0 }
        );
    }
}
