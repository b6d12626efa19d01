//! Upstream market-data interfaces.
//!
//! The engine only sees these traits; vendor-specific transports live in
//! the host process. `StaticMarketData` is an in-memory provider used by
//! the demo binary and the tests, with per-symbol failure injection and
//! artificial latency so degraded upstreams can be simulated.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{Bar, OptionQuote};

/// Read-side market data consumed by the scanner and sweep detector
#[async_trait]
pub trait MarketData: Send + Sync {
    /// One options-chain snapshot for a symbol
    async fn get_chain_snapshot(&self, symbol: &str) -> Result<Vec<OptionQuote>>;

    /// Bulk daily bars for the whole symbol set, one call per refresh
    async fn get_historical_bars(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<String, Vec<Bar>>>;

    /// Current underlying price
    async fn get_current_price(&self, symbol: &str) -> Result<f64>;
}

/// In-memory provider backed by fixed snapshots
#[derive(Default)]
pub struct StaticMarketData {
    chains: HashMap<String, Vec<OptionQuote>>,
    bars: HashMap<String, Vec<Bar>>,
    prices: HashMap<String, f64>,
    failing: HashSet<String>,
    latency: Option<Duration>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, symbol: &str, chain: Vec<OptionQuote>) -> Self {
        self.chains.insert(symbol.to_string(), chain);
        self
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    /// Every call touching `symbol` fails (simulates a bad upstream)
    pub fn with_failure(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    /// Every call sleeps this long first (simulates a slow upstream)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn simulate(&self, symbol: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(symbol) {
            bail!("simulated upstream failure for {}", symbol);
        }
        Ok(())
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn get_chain_snapshot(&self, symbol: &str) -> Result<Vec<OptionQuote>> {
        self.simulate(symbol).await?;
        Ok(self.chains.get(symbol).cloned().unwrap_or_default())
    }

    async fn get_historical_bars(
        &self,
        symbols: &[String],
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut out = HashMap::new();
        for symbol in symbols {
            if self.failing.contains(symbol) {
                continue; // missing entry, caller degrades per symbol
            }
            if let Some(bars) = self.bars.get(symbol) {
                out.insert(symbol.clone(), bars.clone());
            }
        }
        Ok(out)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64> {
        self.simulate(symbol).await?;
        match self.prices.get(symbol) {
            Some(price) => Ok(*price),
            None => bail!("no price for {}", symbol),
        }
    }
}
