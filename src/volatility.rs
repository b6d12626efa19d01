//! Per-symbol realized-volatility distribution cache.
//!
//! Holds the current 30-day realized volatility and a rolling distribution
//! of historical 30-day windows, used to rank today's volatility against
//! its own history. Rebuilt at most once per calendar day per symbol from
//! one bulk daily-bar fetch; a failed or thin history degrades to a fixed
//! default without touching the rest of the universe.

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::VolatilityConfig;
use crate::types::Bar;

/// Distribution entry for one symbol, immutable for the day it was built
#[derive(Debug, Clone)]
struct DistEntry {
    built_on: NaiveDate,
    /// Current 30-day realized vol, annualized
    current: f64,
    /// Ascending historical 30-day window vols (<= max_samples entries)
    samples: Vec<f64>,
    /// Recent daily closes, kept for momentum signals computed off the
    /// same fetch (no extra network calls)
    closes: Vec<f64>,
}

/// Shared once-per-day volatility cache
pub struct VolatilityCache {
    entries: DashMap<String, DistEntry>,
    config: VolatilityConfig,
}

impl VolatilityCache {
    pub fn new(config: VolatilityConfig) -> Self {
        VolatilityCache {
            entries: DashMap::new(),
            config,
        }
    }

    /// True when any of `symbols` lacks a same-day distribution
    pub fn needs_refresh(&self, symbols: &[String], today: NaiveDate) -> bool {
        symbols.iter().any(|sym| {
            self.entries
                .get(sym)
                .map(|e| e.built_on != today)
                .unwrap_or(true)
        })
    }

    /// Rebuild distributions from one bulk bar fetch.
    ///
    /// Same-day entries are left untouched. Symbols with missing or thin
    /// history fall back to the default vol and an empty distribution;
    /// those fallback entries are never stamped as fresh, so the next
    /// refresh retries them instead of serving defaults until midnight.
    pub fn refresh(
        &self,
        symbols: &[String],
        bars: &std::collections::HashMap<String, Vec<Bar>>,
        today: NaiveDate,
    ) {
        let mut built = 0usize;
        let mut degraded = 0usize;
        for symbol in symbols {
            if let Some(entry) = self.entries.get(symbol) {
                if entry.built_on == today {
                    continue; // same-day distribution is reused
                }
            }
            let entry = match bars.get(symbol).and_then(|b| self.build_entry(b, today)) {
                Some(entry) => {
                    built += 1;
                    entry
                }
                None => {
                    degraded += 1;
                    debug!(
                        "📉 {}: insufficient bar history, using default vol {:.0}%",
                        symbol,
                        self.config.default_vol * 100.0
                    );
                    DistEntry {
                        // never counts as fresh; retried on the next pass
                        built_on: NaiveDate::MIN,
                        current: self.config.default_vol,
                        samples: Vec::new(),
                        closes: Vec::new(),
                    }
                }
            };
            self.entries.insert(symbol.clone(), entry);
        }
        if degraded > 0 {
            warn!(
                "⚠️  Volatility refresh: {} built, {} degraded to defaults",
                built, degraded
            );
        } else if built > 0 {
            debug!("📊 Volatility refresh: {} distributions built", built);
        }
    }

    fn build_entry(&self, bars: &[Bar], today: NaiveDate) -> Option<DistEntry> {
        let window = self.config.window_days;
        let closes: Vec<f64> = bars
            .iter()
            .map(|b| b.close)
            .filter(|c| *c > 0.0 && c.is_finite())
            .collect();
        // a full window of returns or nothing; a 5-bar "30-day vol" would
        // silently understate the distribution
        if closes.len() < window + 1 {
            return None;
        }
        let current = realized_vol(&closes[closes.len() - (window + 1)..])?;

        // Slide the window across the full history, oldest first, keeping
        // the most recent max_samples windows.
        let mut samples: Vec<f64> = Vec::new();
        if closes.len() > window {
            for start in 0..=closes.len() - (window + 1) {
                if let Some(vol) = realized_vol(&closes[start..start + window + 1]) {
                    samples.push(vol);
                }
            }
        }
        if samples.len() > self.config.max_samples {
            samples.drain(..samples.len() - self.config.max_samples);
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Some(DistEntry {
            built_on: today,
            current,
            samples,
            closes,
        })
    }

    /// Current 30-day realized vol, default when unknown
    pub fn current_vol(&self, symbol: &str) -> f64 {
        self.entries
            .get(symbol)
            .map(|e| e.current)
            .unwrap_or(self.config.default_vol)
    }

    /// Recent daily closes from the last refresh (for RSI off the same fetch)
    pub fn closes(&self, symbol: &str) -> Option<Vec<f64>> {
        self.entries
            .get(symbol)
            .filter(|e| !e.closes.is_empty())
            .map(|e| e.closes.clone())
    }

    /// Percentile rank of `vol` against the symbol's own history: the
    /// share of distribution entries strictly below it, in [0, 100].
    ///
    /// Without a distribution this degrades to a coarse comparison against
    /// the scalar 30-day vol (lower confidence).
    pub fn percentile_rank(&self, symbol: &str, vol: f64) -> f64 {
        let entry = match self.entries.get(symbol) {
            Some(e) => e,
            None => return 50.0,
        };
        if entry.samples.is_empty() {
            return coarse_rank(vol, entry.current);
        }
        let below = entry.samples.iter().filter(|s| **s < vol).count();
        100.0 * below as f64 / entry.samples.len() as f64
    }
}

/// Annualized realized vol from a run of daily closes (needs window+1
/// closes for window returns); sample std-dev of log returns x sqrt(252).
fn realized_vol(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let vol = var.sqrt() * 252f64.sqrt();
    vol.is_finite().then_some(vol)
}

/// Lower-confidence rank used when only the scalar 30-day vol is known
fn coarse_rank(vol: f64, current: f64) -> f64 {
    if current <= 0.0 {
        return 50.0;
    }
    let ratio = vol / current;
    if ratio < 0.8 {
        25.0
    } else if ratio < 1.0 {
        45.0
    } else if ratio < 1.25 {
        65.0
    } else {
        85.0
    }
}
