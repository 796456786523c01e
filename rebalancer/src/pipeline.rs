use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use domain::{
    resolve_target_class, AssetClass, BalanceEntry, EngineError, GrowthReport, PortfolioConfig,
    PortfolioSnapshot,
};
use indexer::{fold_entries, BalanceAggregator};
use serde::Serialize;
use strategy_engine::{
    growth_report, portfolio_value_series, rebalance_pair, valuate, DeviationAdvisor,
    IdealDeviation, PairInput, PairRebalance, RebalancePlan, RebalancePlanner,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::services::{load_histories, FallbackPriceOracle, PriceBoard};

/// Everything one refresh cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub cycle: u64,
    pub entries: Vec<BalanceEntry>,
    pub prices: PriceBoard,
    pub snapshot: PortfolioSnapshot,
    pub ideal_deviation: IdealDeviation,
    pub plan: Result<RebalancePlan, EngineError>,
    pub growth: Option<GrowthReport>,
    pub btc_in_gold: Option<f64>,
    pub total_in_btc: Option<f64>,
    pub total_in_gold: Option<f64>,
    pub gold_pair: Option<PairRebalance>,
}

pub struct RefreshCoordinator {
    oracle: Arc<FallbackPriceOracle>,
    aggregator: BalanceAggregator,
    cycle: AtomicU64,
    latest: RwLock<Option<Arc<RefreshOutcome>>>,
}

impl RefreshCoordinator {
    pub fn new(oracle: Arc<FallbackPriceOracle>, aggregator: BalanceAggregator) -> Self {
        Self {
            oracle,
            aggregator,
            cycle: AtomicU64::new(0),
            latest: RwLock::new(None),
        }
    }

    pub fn oracle(&self) -> &FallbackPriceOracle {
        &self.oracle
    }

    /// Claims the next cycle token. Tokens start at 1 and only grow.
    pub fn begin_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn refresh(&self, config: &PortfolioConfig) -> Result<Arc<RefreshOutcome>> {
        config.validate()?;
        let cycle = self.begin_cycle();
        let outcome = self.run_cycle(cycle, config, Utc::now()).await;
        Ok(self.publish(outcome).await)
    }

    /// Fan-out (balances and prices together), then the synchronous valuation and
    /// planning stage, then growth from historical series.
    pub async fn run_cycle(
        &self,
        cycle: u64,
        config: &PortfolioConfig,
        now: DateTime<Utc>,
    ) -> RefreshOutcome {
        let tasks = config.balance_tasks();
        let classes = config.priced_classes();
        info!(
            cycle,
            balance_tasks = tasks.len(),
            priced_classes = classes.len(),
            "refresh cycle started"
        );

        let (entries, prices) = tokio::join!(
            self.aggregator.collect(tasks),
            self.oracle.price_board(classes)
        );

        let holdings = fold_entries(&entries);
        let snapshot = valuate(
            cycle,
            &holdings.by_class,
            &holdings.by_symbol,
            &prices.quotes,
            now,
        );

        let advisor = DeviationAdvisor::new(config.deviation);
        let ideal_deviation = advisor.evaluate(&snapshot);
        let plan = RebalancePlanner::new(&config.gold_token, advisor).plan(&snapshot, &config.targets);
        if let Err(err) = &plan {
            warn!(error = %err, cycle, "rebalance plan rejected");
        }

        let growth = self.growth(&snapshot, config.history_days, now).await;
        let btc_in_gold = prices.cross_rate(&AssetClass::btc(), &config.gold_token);
        let gold_pair = btc_in_gold.and_then(|rate| gold_pair(&snapshot, config, rate));

        info!(
            cycle,
            total_valuation = snapshot.total_valuation,
            unresolved_prices = prices.missing.len(),
            failed_balances = entries.iter().filter(|e| !e.is_ok()).count(),
            "refresh cycle finished"
        );

        RefreshOutcome {
            cycle,
            total_in_btc: snapshot.total_in(&AssetClass::btc()),
            total_in_gold: snapshot.total_in(&config.gold_token),
            entries,
            prices,
            snapshot,
            ideal_deviation,
            plan,
            growth,
            btc_in_gold,
            gold_pair,
        }
    }

    /// Stores `outcome` unless a newer cycle is already published. The outcome is
    /// returned either way.
    pub async fn publish(&self, outcome: RefreshOutcome) -> Arc<RefreshOutcome> {
        let outcome = Arc::new(outcome);
        let mut latest = self.latest.write().await;
        match latest.as_ref() {
            Some(current) if current.cycle >= outcome.cycle => {
                info!(
                    cycle = outcome.cycle,
                    published = current.cycle,
                    "discarding stale refresh outcome"
                );
            }
            _ => *latest = Some(outcome.clone()),
        }
        outcome
    }

    pub async fn latest(&self) -> Option<Arc<RefreshOutcome>> {
        self.latest.read().await.clone()
    }

    async fn growth(
        &self,
        snapshot: &PortfolioSnapshot,
        days: u32,
        now: DateTime<Utc>,
    ) -> Option<GrowthReport> {
        let held: BTreeMap<AssetClass, f64> = snapshot
            .positions
            .values()
            .filter(|p| p.quantity > 0.0 && p.price.is_some() && !p.asset.is_cash())
            .map(|p| (p.asset.clone(), p.quantity))
            .collect();
        if held.is_empty() {
            return None;
        }
        let classes: Vec<AssetClass> = held.keys().cloned().collect();
        let histories = load_histories(&self.oracle, &classes, days).await;
        let series = portfolio_value_series(&histories, &held);
        growth_report(&series, now)
    }
}

/// Gold-denominated pair rebalance, only when the targets are exactly BTC and gold.
fn gold_pair(
    snapshot: &PortfolioSnapshot,
    config: &PortfolioConfig,
    btc_in_gold: f64,
) -> Option<PairRebalance> {
    let btc = AssetClass::btc();
    let mut btc_percent = 0.0;
    let mut gold_percent = 0.0;
    for target in &config.targets {
        let asset = resolve_target_class(&target.symbol, &config.gold_token);
        if asset == btc {
            btc_percent += target.percent;
        } else if asset == config.gold_token {
            gold_percent += target.percent;
        } else {
            return None;
        }
    }

    let gold_position = snapshot.position(&config.gold_token)?;
    let input = PairInput {
        gold_qty: gold_position.quantity,
        btc_qty: snapshot.position(&btc).map(|p| p.quantity).unwrap_or(0.0),
        gold_percent,
        btc_percent,
        btc_in_gold,
        gold_price_usd: gold_position.price?,
    };
    match rebalance_pair(&input) {
        Ok(pair) => Some(pair),
        Err(err) => {
            warn!(error = %err, "gold pair rebalance skipped");
            None
        }
    }
}
