//! Batch scan orchestrator.
//!
//! Partitions the universe into fixed-size batches, fetches one chain
//! snapshot per symbol with bounded concurrency (batches sequential,
//! symbols within a batch concurrent), isolates per-symbol failures, and
//! races the whole scan against a hard wall-clock deadline. Only one scan
//! may be in flight at a time; a re-entrant call is rejected.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::market::MarketData;
use crate::pricing::StrikeLadder;
use crate::scorer::{build_candidate, CompositeScorer, ContractContext, FlowSignal, FunnelFilter};
use crate::signals;
use crate::time_window::{determine_target_expiry, ExpiryWindow};
use crate::types::{Candidate, ScanOutcome};
use crate::volatility::VolatilityCache;

const RSI_PERIOD: usize = 14;

/// Universe scanner. Owns the in-flight guard and the last outcome;
/// shares the volatility cache with the sweep detector.
pub struct ScanEngine {
    provider: Arc<dyn MarketData>,
    vol_cache: Arc<VolatilityCache>,
    config: Arc<Config>,
    funnel: FunnelFilter,
    scorer: CompositeScorer,
    in_flight: AtomicBool,
    last_outcome: RwLock<Option<ScanOutcome>>,
}

impl ScanEngine {
    pub fn new(
        provider: Arc<dyn MarketData>,
        vol_cache: Arc<VolatilityCache>,
        config: Arc<Config>,
    ) -> Self {
        ScanEngine {
            funnel: FunnelFilter::new(config.filters.clone()),
            scorer: CompositeScorer::new(config.scoring.clone()),
            provider,
            vol_cache,
            config,
            in_flight: AtomicBool::new(false),
            last_outcome: RwLock::new(None),
        }
    }

    /// Run one full universe scan. Always returns a well-formed outcome:
    /// partial (with `complete = false`) on deadline, empty on re-entrant
    /// rejection, never an error.
    pub async fn scan(&self) -> ScanOutcome {
        self.scan_at(Utc::now()).await
    }

    /// Scan with an explicit "now" (the expiry window and cache staleness
    /// both derive from it).
    pub async fn scan_at(&self, now: DateTime<Utc>) -> ScanOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("🚫 Scan rejected: another scan is already in flight");
            return ScanOutcome::rejected();
        }

        let started = Instant::now();
        let window = determine_target_expiry(now, &self.config.window);
        info!(
            "🔍 Scan started: {} symbols, {} expiry {}",
            self.config.scan.universe.len(),
            window.mode,
            window.expiry_date
        );

        let collected: Arc<Mutex<Vec<Candidate>>> = Arc::new(Mutex::new(Vec::new()));
        let analyzed = Arc::new(AtomicUsize::new(0));
        let passed = Arc::new(AtomicUsize::new(0));

        let deadline = Duration::from_secs(self.config.scan.timeout_secs);
        let work = self.run_batches(now, &window, &collected, &analyzed, &passed);
        // A timeout drops the batch future, cancelling outstanding fetches.
        let complete = match tokio::time::timeout(deadline, work).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "⏱️  Scan deadline hit after {}s, returning partial results",
                    deadline.as_secs()
                );
                false
            }
        };

        let mut candidates = collected.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let min_total = self.config.scoring.min_total_score;
        let min_layers = self.config.scoring.min_active_layers;
        candidates.retain(|c| c.score.eligible(min_total, min_layers));
        candidates.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.scan.top_n);

        let outcome = ScanOutcome {
            candidates,
            scan_time_ms: started.elapsed().as_millis() as u64,
            symbols_analyzed: analyzed.load(Ordering::SeqCst),
            symbols_passed: passed.load(Ordering::SeqCst),
            timestamp: now,
            complete,
        };
        info!(
            "✅ Scan finished in {}ms: {}/{} symbols passed, {} candidates{}",
            outcome.scan_time_ms,
            outcome.symbols_passed,
            outcome.symbols_analyzed,
            outcome.candidates.len(),
            if outcome.complete { "" } else { " (INCOMPLETE)" }
        );

        *self.last_outcome.write().await = Some(outcome.clone());
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Top-ranked candidates from the most recent scan
    pub async fn top_candidates(&self) -> Vec<Candidate> {
        self.last_outcome
            .read()
            .await
            .as_ref()
            .map(|o| o.candidates.clone())
            .unwrap_or_default()
    }

    /// Most recent scan outcome, if any scan has completed
    pub async fn last_outcome(&self) -> Option<ScanOutcome> {
        self.last_outcome.read().await.clone()
    }

    async fn run_batches(
        &self,
        now: DateTime<Utc>,
        window: &ExpiryWindow,
        collected: &Arc<Mutex<Vec<Candidate>>>,
        analyzed: &Arc<AtomicUsize>,
        passed: &Arc<AtomicUsize>,
    ) {
        self.refresh_volatility(now).await;

        let min_total = self.config.scoring.min_total_score;
        let min_layers = self.config.scoring.min_active_layers;
        for batch in self.config.scan.universe.chunks(self.config.scan.batch_size) {
            let futures: Vec<_> = batch
                .iter()
                .map(|symbol| self.evaluate_symbol(symbol, window))
                .collect();
            let results = join_all(futures).await;

            for (symbol, result) in batch.iter().zip(results) {
                analyzed.fetch_add(1, Ordering::SeqCst);
                match result {
                    Ok(candidates) => {
                        if candidates
                            .iter()
                            .any(|c| c.score.eligible(min_total, min_layers))
                        {
                            passed.fetch_add(1, Ordering::SeqCst);
                        }
                        if !candidates.is_empty() {
                            collected
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .extend(candidates);
                        }
                    }
                    Err(e) => {
                        // per-symbol isolation: one bad response never
                        // aborts the batch or the scan
                        debug!("⚠️  {} skipped: {:#}", symbol, e);
                    }
                }
            }
        }
    }

    /// Once-per-day bulk bar fetch feeding the distribution cache
    async fn refresh_volatility(&self, now: DateTime<Utc>) {
        let today = now.with_timezone(&New_York).date_naive();
        let universe = &self.config.scan.universe;
        if !self.vol_cache.needs_refresh(universe, today) {
            return;
        }
        let from = today - chrono::Duration::days(self.config.volatility.history_days);
        match self.provider.get_historical_bars(universe, from, today).await {
            Ok(bars) => self.vol_cache.refresh(universe, &bars, today),
            Err(e) => {
                warn!("⚠️  Bulk bar fetch failed, distributions degrade to defaults: {:#}", e);
                let empty = std::collections::HashMap::new();
                self.vol_cache.refresh(universe, &empty, today);
            }
        }
    }

    /// Evaluate every contract of one symbol at the target expiry.
    /// Failures bubble to the caller where they are logged and swallowed.
    async fn evaluate_symbol(
        &self,
        symbol: &str,
        window: &ExpiryWindow,
    ) -> Result<Vec<Candidate>> {
        let spot = self
            .provider
            .get_current_price(symbol)
            .await
            .with_context(|| format!("price fetch for {}", symbol))?;
        if spot <= 0.0 || !spot.is_finite() {
            bail!("bad spot price {} for {}", spot, symbol);
        }

        let chain = self
            .provider
            .get_chain_snapshot(symbol)
            .await
            .with_context(|| format!("chain fetch for {}", symbol))?;
        let quotes: Vec<_> = chain
            .into_iter()
            .filter(|q| q.expiry == window.expiry_date)
            .collect();
        if quotes.is_empty() {
            return Ok(Vec::new());
        }

        // per-symbol context, computed once across the whole strike ladder
        let sigma = self.vol_cache.current_vol(symbol);
        let vol_rank = self.vol_cache.percentile_rank(symbol, sigma);
        let max_pain = signals::max_pain_strike(&quotes);
        let skew = signals::iv_skew(&quotes, spot);
        let rsi = self
            .vol_cache
            .closes(symbol)
            .and_then(|closes| signals::rsi(&closes, RSI_PERIOD));
        let strikes: Vec<f64> = quotes.iter().map(|q| q.strike).collect();
        let ladder = StrikeLadder::build(
            spot,
            window.time_to_expiry_years,
            self.config.scan.risk_free_rate,
            sigma,
            &strikes,
        );
        let iv_ceiling = self.config.iv_ceiling_for(symbol);

        let mut candidates = Vec::new();
        for quote in &quotes {
            let greeks = match ladder.greeks(quote.strike, quote.side) {
                Some(g) => g,
                None => continue,
            };
            let iv = if quote.implied_vol > 0.0 {
                quote.implied_vol
            } else {
                sigma
            };
            let ctx = ContractContext {
                spot,
                mode: window.mode,
                time_to_expiry_years: window.time_to_expiry_years,
                days_to_expiry: window.days_to_expiry,
                risk_free_rate: self.config.scan.risk_free_rate,
                iv,
                greeks,
                vol_rank,
                iv_ceiling,
                max_pain,
                skew,
                rsi,
                flow: FlowSignal::LiquidityRatio {
                    volume: quote.volume,
                    open_interest: quote.open_interest,
                },
            };

            match self.funnel.check(quote, &ctx) {
                Ok(()) => {
                    let score = self.scorer.score(quote, &ctx);
                    candidates.push(build_candidate(quote, &ctx, score, &self.config.filters));
                }
                Err(rejection) => {
                    debug!("🚮 {} {} {}: {}", symbol, quote.strike, quote.side, rejection);
                }
            }
        }
        Ok(candidates)
    }
}
