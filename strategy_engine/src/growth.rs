use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use domain::{AssetClass, GrowthReport, GrowthWindow, HistoricalPoint, ValuePoint};

/// Daily portfolio value from per-class price histories and current quantities.
///
/// The longest history provides the day axis. Other classes are matched by UTC calendar
/// date; a class with no point on a given day contributes 0 to it.
pub fn portfolio_value_series(
    histories: &BTreeMap<AssetClass, Vec<HistoricalPoint>>,
    quantities: &BTreeMap<AssetClass, f64>,
) -> Vec<ValuePoint> {
    let Some(reference) = histories
        .values()
        .fold(None::<&Vec<HistoricalPoint>>, |longest, series| match longest {
            Some(current) if current.len() >= series.len() => Some(current),
            _ => Some(series),
        })
    else {
        return Vec::new();
    };

    let by_day: Vec<(f64, HashMap<NaiveDate, f64>)> = histories
        .iter()
        .map(|(asset, series)| {
            let quantity = quantities.get(asset).copied().unwrap_or(0.0);
            let mut prices = HashMap::with_capacity(series.len());
            for point in series {
                prices
                    .entry(point.timestamp.date_naive())
                    .or_insert(point.price);
            }
            (quantity, prices)
        })
        .collect();

    reference
        .iter()
        .map(|point| {
            let day = point.timestamp.date_naive();
            let value = by_day
                .iter()
                .map(|(quantity, prices)| quantity * prices.get(&day).copied().unwrap_or(0.0))
                .sum();
            ValuePoint {
                timestamp: point.timestamp,
                value,
            }
        })
        .collect()
}

/// Point closest to `target`; the earliest one wins a tie.
pub fn nearest_point(series: &[ValuePoint], target: DateTime<Utc>) -> Option<&ValuePoint> {
    let mut best: Option<(&ValuePoint, i64)> = None;
    for point in series {
        let distance = (point.timestamp - target).num_milliseconds().abs();
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((point, distance)),
        }
    }
    best.map(|(point, _)| point)
}

pub fn growth_report(series: &[ValuePoint], now: DateTime<Utc>) -> Option<GrowthReport> {
    let current_value = series.last()?.value;
    let windows = GrowthWindow::ALL
        .iter()
        .map(|window| {
            let target = now - Duration::days(window.days());
            let past = nearest_point(series, target).map(|p| p.value).unwrap_or(0.0);
            let growth = if past == 0.0 {
                0.0
            } else {
                (current_value - past) / past * 100.0
            };
            (*window, growth)
        })
        .collect();

    Some(GrowthReport {
        as_of: now,
        current_value,
        windows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn history(prices: &[f64]) -> Vec<HistoricalPoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| HistoricalPoint {
                timestamp: day(i as i64),
                price: *price,
            })
            .collect()
    }

    #[test]
    fn value_series_multiplies_quantities_by_daily_prices() {
        let mut histories = BTreeMap::new();
        histories.insert(AssetClass::btc(), history(&[100.0, 110.0, 120.0]));
        histories.insert(AssetClass::new("PAXG"), history(&[10.0, 20.0]));
        let quantities = [(AssetClass::btc(), 2.0), (AssetClass::new("PAXG"), 3.0)]
            .into_iter()
            .collect();

        let series = portfolio_value_series(&histories, &quantities);

        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![230.0, 280.0, 240.0]);
        assert_eq!(series[2].timestamp, day(2));
    }

    #[test]
    fn seven_day_growth() {
        let series: Vec<ValuePoint> = (0..=7)
            .map(|i| ValuePoint {
                timestamp: day(i),
                value: if i == 7 { 110.0 } else { 100.0 },
            })
            .collect();

        let report = growth_report(&series, day(7)).unwrap();

        assert!((report.growth(GrowthWindow::Weekly).unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(report.current_value, 110.0);
        assert_eq!(report.windows.len(), 6);
    }

    #[test]
    fn zero_past_value_yields_zero_growth() {
        let series = vec![
            ValuePoint {
                timestamp: day(0),
                value: 0.0,
            },
            ValuePoint {
                timestamp: day(30),
                value: 500.0,
            },
        ];

        let report = growth_report(&series, day(30)).unwrap();

        assert_eq!(report.growth(GrowthWindow::Monthly), Some(0.0));
        assert_eq!(report.growth(GrowthWindow::Yearly), Some(0.0));
    }

    #[test]
    fn nearest_prefers_first_on_tie() {
        let series = vec![
            ValuePoint {
                timestamp: day(0),
                value: 1.0,
            },
            ValuePoint {
                timestamp: day(2),
                value: 2.0,
            },
        ];
        assert_eq!(nearest_point(&series, day(1)).unwrap().value, 1.0);
        assert!(nearest_point(&[], day(1)).is_none());
    }

    #[test]
    fn empty_series_has_no_report() {
        assert!(growth_report(&[], day(0)).is_none());
        assert!(portfolio_value_series(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }
}
