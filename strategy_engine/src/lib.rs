//! Synchronous portfolio math: valuation, deviation advice, rebalance planning,
//! cash deployment, the gold/BTC pair rebalance and growth statistics.
//!
//! Nothing here performs I/O; every function is a pure transformation of its inputs.

pub mod cash;
pub mod deviation;
pub mod growth;
pub mod pair;
pub mod planner;
pub mod valuation;

pub use cash::{deploy_cash, CashDeployment, CashPurchase};
pub use deviation::{DeviationAdvisor, IdealDeviation};
pub use growth::{growth_report, nearest_point, portfolio_value_series};
pub use pair::{rebalance_pair, PairInput, PairLeg, PairRebalance};
pub use planner::{RebalancePlan, RebalancePlanner, Suitability, Verdict};
pub use valuation::valuate;
