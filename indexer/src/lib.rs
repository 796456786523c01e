use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use domain::{AssetClass, BalanceEntry, BalanceTask};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(8);

/// One wallet/contract lookup. Implementations return a scaled quantity or an error;
/// timeouts and zero-substitution belong to the aggregator.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn fetch_balance(&self, task: &BalanceTask) -> anyhow::Result<f64>;
}

#[derive(Clone)]
pub struct BalanceAggregator {
    source: Arc<dyn BalanceSource>,
    max_concurrency: usize,
    timeout: Duration,
}

impl BalanceAggregator {
    pub fn new(source: Arc<dyn BalanceSource>, max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            source,
            max_concurrency: max_concurrency.clamp(1, Semaphore::MAX_PERMITS),
            timeout,
        }
    }

    /// Runs every task concurrently. Output order matches input order; a failed or
    /// timed-out task yields a zero entry carrying the reason.
    pub async fn collect(&self, tasks: Vec<BalanceTask>) -> Vec<BalanceEntry> {
        info!(
            task_count = tasks.len(),
            max_concurrency = self.max_concurrency,
            "collecting balances"
        );
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            let timeout = self.timeout;
            let fallback = task.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => return BalanceEntry::failed(&task, err.to_string()),
                };
                lookup(source.as_ref(), &task, timeout).await
            });
            handles.push((fallback, handle));
        }

        let mut entries = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            match handle.await {
                Ok(entry) => entries.push(entry),
                Err(join_err) => {
                    warn!(error = %join_err, source_id = %task.source_id, "balance task join error");
                    entries.push(BalanceEntry::failed(&task, join_err.to_string()));
                }
            }
        }
        entries
    }
}

async fn lookup(source: &dyn BalanceSource, task: &BalanceTask, timeout: Duration) -> BalanceEntry {
    match tokio::time::timeout(timeout, source.fetch_balance(task)).await {
        Ok(Ok(quantity)) if quantity.is_finite() && quantity >= 0.0 => {
            BalanceEntry::ok(task, quantity)
        }
        Ok(Ok(quantity)) => {
            warn!(
                source_id = %task.source_id,
                symbol = %task.symbol,
                quantity,
                "balance source returned an unusable quantity, counting zero"
            );
            BalanceEntry::failed(task, format!("unusable quantity {quantity}"))
        }
        Ok(Err(err)) => {
            warn!(
                error = %err,
                source_id = %task.source_id,
                symbol = %task.symbol,
                "balance lookup failed, counting zero"
            );
            BalanceEntry::failed(task, err.to_string())
        }
        Err(_) => {
            warn!(
                source_id = %task.source_id,
                symbol = %task.symbol,
                timeout_ms = timeout.as_millis() as u64,
                "balance lookup timed out, counting zero"
            );
            BalanceEntry::failed(task, format!("timed out after {timeout:?}"))
        }
    }
}

/// Per-class totals plus the raw per-symbol totals kept for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Holdings {
    pub by_class: BTreeMap<AssetClass, f64>,
    pub by_symbol: BTreeMap<String, f64>,
}

impl Holdings {
    pub fn quantity(&self, asset: &AssetClass) -> f64 {
        self.by_class.get(asset).copied().unwrap_or(0.0)
    }
}

/// Deterministic fold: entries are ordered by (source id, symbol) before summing, so
/// the totals do not depend on the order lookups completed in.
pub fn fold_entries(entries: &[BalanceEntry]) -> Holdings {
    let mut ordered: Vec<&BalanceEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| {
        a.source_id
            .cmp(&b.source_id)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let mut holdings = Holdings::default();
    for entry in ordered {
        let class = AssetClass::from_symbol(&entry.symbol);
        *holdings.by_class.entry(class).or_insert(0.0) += entry.quantity;
        *holdings
            .by_symbol
            .entry(entry.symbol.trim().to_uppercase())
            .or_insert(0.0) += entry.quantity;
    }
    holdings
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{BalanceLookup, TokenDefinition};
    use std::collections::HashMap;

    struct StubSource {
        balances: HashMap<String, f64>,
    }

    #[async_trait]
    impl BalanceSource for StubSource {
        async fn fetch_balance(&self, task: &BalanceTask) -> anyhow::Result<f64> {
            if let BalanceLookup::Native { address } = &task.lookup {
                if address == "slow" {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }
            self.balances
                .get(&task.source_id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no balance for {}", task.source_id))
        }
    }

    fn token_task(symbol: &str, contract: &str) -> BalanceTask {
        let token = TokenDefinition::new(137, contract, symbol, symbol);
        BalanceTask::token(137, "http://rpc", &token, "0xholder")
    }

    fn aggregator(balances: &[(&BalanceTask, f64)]) -> BalanceAggregator {
        let balances = balances
            .iter()
            .map(|(task, qty)| (task.source_id.clone(), *qty))
            .collect();
        BalanceAggregator::new(
            Arc::new(StubSource { balances }),
            2,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn stablecoins_sum_into_usd() {
        let usdt = token_task("USDT", "0x01");
        let usdc = token_task("USDC", "0x02");
        let dai = token_task("DAI", "0x03");
        let agg = aggregator(&[(&usdt, 100.0), (&usdc, 50.0), (&dai, 25.0)]);

        let entries = agg.collect(vec![usdt, usdc, dai]).await;
        let holdings = fold_entries(&entries);

        assert_eq!(holdings.quantity(&AssetClass::usd()), 175.0);
        assert_eq!(holdings.by_symbol.get("USDC"), Some(&50.0));
    }

    #[tokio::test]
    async fn wrapped_btc_joins_native_but_stays_visible() {
        let native = BalanceTask::native("bc1qnative");
        let wrapped = token_task("WBTC", "0x04");
        let agg = aggregator(&[(&native, 0.5), (&wrapped, 0.3)]);

        let holdings = fold_entries(&agg.collect(vec![native, wrapped]).await);

        assert!((holdings.quantity(&AssetClass::btc()) - 0.8).abs() < 1e-12);
        assert_eq!(holdings.by_symbol.get("WBTC"), Some(&0.3));
        assert_eq!(holdings.by_symbol.get("BTC"), Some(&0.5));
        assert!(!holdings.by_class.contains_key(&AssetClass::new("WBTC")));
    }

    #[tokio::test]
    async fn failed_lookup_counts_zero_without_aborting() {
        let good = BalanceTask::native("bc1qgood");
        let missing = BalanceTask::native("bc1qmissing");
        let agg = aggregator(&[(&good, 1.25)]);

        let entries = agg.collect(vec![missing, good]).await;

        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_ok());
        assert_eq!(entries[0].quantity, 0.0);
        assert!(entries[1].is_ok());
        assert_eq!(fold_entries(&entries).quantity(&AssetClass::btc()), 1.25);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_lookup_times_out() {
        let slow = BalanceTask::native("slow");
        let fast = BalanceTask::native("fast");
        let agg = aggregator(&[(&slow, 9.0), (&fast, 2.0)]);

        let entries = agg.collect(vec![slow, fast]).await;

        assert!(entries[0]
            .error
            .as_deref()
            .is_some_and(|reason| reason.contains("timed out")));
        assert_eq!(fold_entries(&entries).quantity(&AssetClass::btc()), 2.0);
    }

    #[tokio::test]
    async fn negative_or_nan_quantities_are_rejected() {
        let negative = BalanceTask::native("bc1qneg");
        let nan = BalanceTask::native("bc1qnan");
        let agg = aggregator(&[(&negative, -3.0), (&nan, f64::NAN)]);

        let entries = agg.collect(vec![negative, nan]).await;

        assert!(entries.iter().all(|e| !e.is_ok() && e.quantity == 0.0));
    }

    #[tokio::test]
    async fn oversized_concurrency_is_clamped() {
        let task = BalanceTask::native("bc1qbig");
        let balances = HashMap::from([(task.source_id.clone(), 1.5)]);
        let agg = BalanceAggregator::new(
            Arc::new(StubSource { balances }),
            usize::MAX,
            Duration::from_secs(1),
        );

        let entries = agg.collect(vec![task]).await;

        assert!(entries[0].is_ok());
        assert_eq!(entries[0].quantity, 1.5);
    }

    #[test]
    fn fold_is_order_independent() {
        let tasks: Vec<BalanceTask> = (0..6)
            .map(|i| token_task(if i % 2 == 0 { "USDT" } else { "DAI" }, &format!("0x{i:02}")))
            .collect();
        let entries: Vec<BalanceEntry> = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| BalanceEntry::ok(task, 0.1 * (i as f64 + 1.0)))
            .collect();
        let mut reversed = entries.clone();
        reversed.reverse();

        assert_eq!(fold_entries(&entries), fold_entries(&reversed));
    }
}
