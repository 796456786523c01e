use std::env;

use anyhow::Context;
use rebalancer::{bootstrap::build_coordinator, config::AppConfig, telemetry};
use strategy_engine::deploy_cash;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;

    let config = AppConfig::from_env()?;
    let portfolio = config.portfolio()?;
    let coordinator = build_coordinator(&config, &portfolio)?;

    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_else(|| "report".to_string());

    match cmd.as_str() {
        "report" => {
            let outcome = coordinator.refresh(&portfolio).await?;
            println!("{}", serde_json::to_string_pretty(outcome.as_ref())?);
        }
        "cash" => {
            let raw = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("missing cash amount"))?;
            let cash: f64 = raw
                .parse()
                .with_context(|| format!("invalid cash amount: {raw}"))?;
            let outcome = coordinator.refresh(&portfolio).await?;
            let deployment = deploy_cash(
                &outcome.snapshot,
                &portfolio.targets,
                &portfolio.gold_token,
                cash,
            )?;
            println!("{}", serde_json::to_string_pretty(&deployment)?);
        }
        "watch" => loop {
            match coordinator.refresh(&portfolio).await {
                Ok(outcome) => {
                    let verdict = outcome
                        .plan
                        .as_ref()
                        .map(|plan| plan.suitability.message.clone())
                        .unwrap_or_else(|err| err.to_string());
                    tracing::info!(
                        cycle = outcome.cycle,
                        total_valuation = outcome.snapshot.total_valuation,
                        ideal = %outcome.ideal_deviation,
                        %verdict,
                        "portfolio refreshed"
                    );
                }
                Err(err) => tracing::warn!(error = %err, "refresh failed"),
            }
            tokio::time::sleep(config.refresh_interval).await;
        },
        _ => {
            eprintln!(
                "Usage: cargo run -p rebalancer -- <command>\n\
                 Commands:\n  report (default)\n  cash <usd_amount>\n  watch"
            );
        }
    }

    Ok(())
}
