//! Pipeline Runtime
//!
//! Runs the ticker cascade and, when enabled, the paper-trading rotation loop:
//! - Opens the SQLite store (crash recovery only)
//! - Loads the pair list from the JSON cache or exchange info
//! - Optionally seeds empty stages from one-minute klines
//! - Spawns every aggregation stage and the trader
//! - On CTRL+C stops the trader, then the stages in cascade order
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables (see each config's `from_env` for the full list):
//!   COINFLOW_DB_PATH - SQLite database path (default: coinflow.db)
//!   ENABLE_PIPELINE - Master switch (default: true)
//!   ENABLE_TRADER - Start the paper trader (default: false)
//!   EXCHANGE_BASE_URL - REST endpoint (default: https://api.binance.com)

use coinflow::bus::{BroadcastBus, MessageBus, SCREENED_TOPIC};
use coinflow::conversion::RoutingConfig;
use coinflow::exchange::paper::{PaperConfig, PaperExchange};
use coinflow::exchange::pairs_cache::load_or_fetch_pairs;
use coinflow::exchange::rest::{BinanceRestClient, DEFAULT_BASE_URL};
use coinflow::exchange::timeout::TimeoutExchange;
use coinflow::exchange::Exchange;
use coinflow::execution::{RiskConfig, Trader};
use coinflow::pipeline::bootstrap::bootstrap_history;
use coinflow::pipeline::screen::LiquidityFilter;
use coinflow::pipeline::{PipelineConfig, PipelineOrchestrator, SeriesStore};
use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 coinflow pipeline runtime");

    let config = PipelineConfig::from_env()?;
    let routing = RoutingConfig::from_env();
    let risk = RiskConfig::from_env()?;

    if !config.enabled {
        info!("⚠️  Pipeline is DISABLED (set ENABLE_PIPELINE=true to activate)");
        return Ok(());
    }

    info!("✅ Pipeline ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    for stage in &config.stages {
        info!(
            "   ├─ Stage {}: buffer {}, delay {}ms, trigger {:?}",
            stage.interval, stage.buffer_size, stage.delay_ms, stage.trigger
        );
    }
    info!("   ├─ Routing profile: {} (reference {})", routing.profile.as_str(), routing.reference_asset);
    info!("   └─ Trader: {}", if risk.enabled { "paper" } else { "disabled" });

    info!("🔧 Opening store...");
    let store = SeriesStore::open(&config.db_path)?;

    let base_url = env::var("EXCHANGE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let rest = Arc::new(BinanceRestClient::new(&base_url)?);
    let exchange: Arc<dyn Exchange> = Arc::new(TimeoutExchange::new(
        rest.clone(),
        Duration::from_millis(config.call_timeout_ms),
    ));

    let pairs = load_or_fetch_pairs(exchange.as_ref(), &config.pairs_cache_path).await?;
    rest.register_pairs(&pairs).await;
    let pairs = Arc::new(pairs);

    let seeded = bootstrap_history(
        exchange.as_ref(),
        &store,
        &config.stages,
        &config.bootstrap_symbols,
        config.bootstrap_lookback,
    )
    .await?;
    if seeded > 0 {
        info!("✅ Bootstrapped {} stages", seeded);
    }

    let liquidity = LiquidityFilter {
        min_reference_volume: config.min_usdt_volume,
        max_spread_percent: config.max_spread_percent,
        reference_asset: routing.reference_asset.clone(),
        priority: routing.priority.clone(),
    };
    let pipeline = PipelineOrchestrator::new(&config, exchange.clone(), pairs.clone(), store, liquidity).start();
    info!("✅ {} stages running", pipeline.stage_count());

    let bus: Arc<dyn MessageBus> = Arc::new(BroadcastBus::default());
    let (trader_shutdown, trader_shutdown_rx) = watch::channel(false);
    let trader_handle = if risk.enabled {
        let paper = PaperExchange::new(exchange.clone(), PaperConfig::from_env()?);
        let trader = Trader::new(
            Arc::new(paper),
            pairs.clone(),
            pipeline.final_output(),
            bus.clone(),
            risk,
            routing,
        );

        let mut updates = bus.subscribe(SCREENED_TOPIC);
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                info!("📊 Screened target: {} @ {}", update.symbol, update.close);
            }
        });

        Some(tokio::spawn(trader.run(trader_shutdown_rx)))
    } else {
        None
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    // Trader first so no rotation starts on a half-flushed cascade
    let _ = trader_shutdown.send(true);
    if let Some(handle) = trader_handle {
        if let Err(e) = handle.await {
            error!("❌ Trader task panicked: {}", e);
        }
    }

    pipeline.shutdown().await?;

    info!("✅ Pipeline runtime stopped");
    Ok(())
}
