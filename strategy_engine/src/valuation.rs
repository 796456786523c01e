use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use domain::{
    AssetClass, PortfolioSnapshot, Position, PriceQuote, ValuationStatus, VALUATION_CURRENCY,
};
use tracing::warn;

/// Merges class quantities with resolved quotes into an immutable snapshot.
///
/// Every class that is either held or quoted gets a position. A held class without a
/// usable price stays visible with `Unavailable` status and contributes nothing to the
/// total; `USD` is valued at 1:1 when no quote was supplied.
pub fn valuate(
    cycle: u64,
    quantities: &BTreeMap<AssetClass, f64>,
    display_quantities: &BTreeMap<String, f64>,
    quotes: &BTreeMap<AssetClass, PriceQuote>,
    timestamp: DateTime<Utc>,
) -> PortfolioSnapshot {
    let classes: BTreeSet<&AssetClass> = quantities.keys().chain(quotes.keys()).collect();

    let mut positions = BTreeMap::new();
    for asset in classes {
        let quantity = quantities.get(asset).copied().unwrap_or(0.0);
        let price = usable_price(asset, quotes.get(asset));
        if price.is_none() && quantity <= 0.0 {
            continue;
        }
        let position = match price {
            Some(price) => Position {
                asset: asset.clone(),
                quantity,
                price: Some(price),
                valuation: quantity * price,
                status: ValuationStatus::Priced,
            },
            None => {
                warn!(asset = %asset, quantity, "valuation unavailable, excluded from total");
                Position {
                    asset: asset.clone(),
                    quantity,
                    price: None,
                    valuation: 0.0,
                    status: ValuationStatus::Unavailable,
                }
            }
        };
        positions.insert(asset.clone(), position);
    }

    let total_valuation = positions.values().map(|p| p.valuation).sum();

    PortfolioSnapshot {
        cycle,
        currency: VALUATION_CURRENCY.to_string(),
        timestamp,
        positions,
        total_valuation,
        display_quantities: display_quantities.clone(),
    }
}

fn usable_price(asset: &AssetClass, quote: Option<&PriceQuote>) -> Option<f64> {
    match quote {
        Some(quote) if quote.price.is_finite() && quote.price > 0.0 => Some(quote.price),
        Some(_) => None,
        None if asset.is_cash() => Some(1.0),
        None => None,
    }
}
