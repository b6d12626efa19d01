//! Service entrypoint: periodic universe scans plus the live sweep
//! detector, wired to an in-memory demo provider. Swapping in a real
//! vendor transport only means handing `ScanEngine` and `SweepDetector` a
//! different `MarketData` implementation and feeding the tape channel from
//! a real stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use odte_engine::config::Config;
use odte_engine::market::{MarketData, StaticMarketData};
use odte_engine::pricing;
use odte_engine::scanner::ScanEngine;
use odte_engine::sweep::SweepDetector;
use odte_engine::time_window::determine_target_expiry;
use odte_engine::types::{Bar, OptionQuote, OptionSide, TradePrint};
use odte_engine::volatility::VolatilityCache;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);
    config.validate()?;

    println!("╔════════════════════════════════════════════╗");
    println!("║        📈  0DTE SIGNAL ENGINE  📉           ║");
    println!("╚════════════════════════════════════════════╝");
    info!(
        "⚙️  Universe: {} symbols, batch {}, scan every {}s, timeout {}s",
        config.scan.universe.len(),
        config.scan.batch_size,
        config.scan.interval_secs,
        config.scan.timeout_secs
    );
    info!(
        "⚙️  Thresholds: total >= {:.1} (sweep >= {:.1}), layers >= {}",
        config.scoring.min_total_score,
        config.scoring.sweep_min_total_score,
        config.scoring.min_active_layers
    );

    let provider: Arc<dyn MarketData> = Arc::new(demo_provider(&config));
    let vol_cache = Arc::new(VolatilityCache::new(config.volatility.clone()));

    let engine = Arc::new(ScanEngine::new(
        provider.clone(),
        vol_cache.clone(),
        config.clone(),
    ));
    let detector = Arc::new(SweepDetector::new(provider, vol_cache, config.clone()));

    // alert consumer: just logs in this build
    let mut alerts = detector.subscribe();
    tokio::spawn(async move {
        while let Ok(alert) = alerts.recv().await {
            info!(
                "📣 ALERT {} {} {} exp {} | ${:.0} notional | score {:?}",
                alert.ticker,
                alert.strike,
                alert.side,
                alert.expiry,
                alert.notional,
                alert.score.map(|s| s.total)
            );
        }
    });

    let (tape_tx, tape_rx) = mpsc::channel::<TradePrint>(1024);
    {
        let detector = detector.clone();
        tokio::spawn(async move { detector.run(tape_rx).await });
    }
    spawn_demo_tape(tape_tx, config.clone());

    let mut ticker = tokio::time::interval(Duration::from_secs(config.scan.interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = engine.scan().await;
                for candidate in &outcome.candidates {
                    info!(
                        "🎯 {} {} {} exp {} | entry ${:.2} target ${:.2} stop ${:.2} | {}",
                        candidate.underlying,
                        candidate.strike,
                        candidate.side,
                        candidate.expiry,
                        candidate.entry_premium,
                        candidate.target_premium,
                        candidate.stop_premium,
                        candidate.score.breakdown()
                    );
                }
                let stats = detector.stats();
                info!(
                    "📊 Tape: {} prints ({} dropped), {} sweeps, {} alerts",
                    stats.prints_seen,
                    stats.prints_dropped,
                    stats.sweeps_detected,
                    stats.alerts_published
                );
                if !detector.is_stream_healthy(Utc::now()) {
                    warn!("🩺 Tape stream quiet past the staleness window");
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("signal handler failed: {}", e);
                }
                info!("👋 Shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Deterministic in-memory market data so the binary runs end to end
/// without vendor credentials.
fn demo_provider(config: &Config) -> StaticMarketData {
    let window = determine_target_expiry(Utc::now(), &config.window);
    let mut provider = StaticMarketData::new();
    for (i, symbol) in config.scan.universe.iter().enumerate() {
        let spot = 80.0 + 45.0 * (i as f64 + 1.0);
        let bars = demo_bars(spot, 260);
        let close = bars.last().map(|b| b.close).unwrap_or(spot);
        provider = provider
            .with_price(symbol, close)
            .with_bars(symbol, bars)
            .with_chain(
                symbol,
                demo_chain(
                    symbol,
                    close,
                    window.expiry_date,
                    window.time_to_expiry_years,
                    config.scan.risk_free_rate,
                ),
            );
    }
    provider
}

fn demo_bars(start: f64, n: usize) -> Vec<Bar> {
    let today = Utc::now().date_naive();
    let mut out = Vec::with_capacity(n);
    let mut price = start;
    for i in 0..n {
        // bounded deterministic walk, enough texture for vol and RSI
        price *= 1.0 + 0.008 * ((i as f64) * 0.7).sin();
        out.push(Bar {
            date: today - chrono::Duration::days((n - i) as i64),
            open: price,
            high: price * 1.004,
            low: price * 0.996,
            close: price,
            volume: 2_000_000,
        });
    }
    out
}

fn demo_chain(
    symbol: &str,
    spot: f64,
    expiry: chrono::NaiveDate,
    tte: f64,
    rate: f64,
) -> Vec<OptionQuote> {
    let atm = spot.round();
    let step = (spot * 0.005).max(0.5).round();
    let mut chain = Vec::new();
    for k in -4i32..=4 {
        let strike = atm + k as f64 * step;
        for side in [OptionSide::Call, OptionSide::Put] {
            // mild put skew so near-money call IV sits at a discount
            let iv = match side {
                OptionSide::Call => 0.19 + 0.004 * k.abs() as f64,
                OptionSide::Put => 0.23 + 0.004 * k.abs() as f64,
            };
            let model = pricing::price(spot, strike, tte, rate, iv, side);
            let mid = model.max(0.05);
            chain.push(OptionQuote {
                underlying: symbol.to_string(),
                strike,
                expiry,
                side,
                bid: (mid - 0.03).max(0.01),
                ask: mid + 0.03,
                last_size: 25,
                volume: if k.abs() <= 1 { 4_000 } else { 600 },
                open_interest: 5_000 - 400 * k.abs() as u64,
                implied_vol: iv,
            });
        }
    }
    chain
}

/// Emits one plausible sweep print per minute against the first watched
/// ticker, so the sweep path is exercised in demo runs.
fn spawn_demo_tape(tx: mpsc::Sender<TradePrint>, config: Arc<Config>) {
    tokio::spawn(async move {
        let ticker = match config.sweep.watch_list.first() {
            Some(t) => t.clone(),
            None => return,
        };
        let code = config.sweep.sweep_condition_codes.first().copied().unwrap_or(14);
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = Utc::now();
            let window = determine_target_expiry(now, &config.window);
            let spot: f64 = 80.0 + 45.0; // matches the first demo symbol
            let strike = ((spot * 1.01) / 0.5).round() * 0.5;
            let symbol = format!(
                "O:{}{:02}{:02}{:02}C{:08}",
                ticker,
                window.expiry_date.year() % 100,
                window.expiry_date.month(),
                window.expiry_date.day(),
                (strike * 1000.0) as u64
            );
            let print = TradePrint {
                option_symbol: symbol,
                size: 200,
                price: 1.80,
                condition_codes: vec![code],
                timestamp: now,
            };
            if tx.send(print).await.is_err() {
                return;
            }
        }
    });
}
