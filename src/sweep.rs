//! Real-time sweep detection off the options tape.
//!
//! Listens to individual trade prints, gates them down to large sweep-style
//! executions on watched tickers, then scores the contract with the same
//! composite layers the batch scanner uses. The funnel filter is skipped on
//! this path: a sweep print is itself the liquidity evidence, and the alert
//! carries the score so the consumer can apply its own bar.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::market::MarketData;
use crate::pricing;
use crate::scorer::{build_candidate, CompositeScorer, ContractContext, FlowSignal};
use crate::signals;
use crate::time_window::{days_to_expiry_for, determine_target_expiry, time_to_expiry_for};
use crate::types::{OptionQuote, OptionSide, SweepAlert, TradePrint};

const ALERT_CHANNEL_CAPACITY: usize = 64;
const RSI_PERIOD: usize = 14;

/// Contract identity recovered from an OCC-style option symbol
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOptionSymbol {
    pub ticker: String,
    pub expiry: NaiveDate,
    pub side: OptionSide,
    pub strike: f64,
}

/// Parse "O:SPY240830C00450000" (the "O:" prefix is optional): ticker,
/// yymmdd expiry, C/P side, then an 8-digit strike in thousandths.
pub fn parse_option_symbol(symbol: &str) -> Result<ParsedOptionSymbol> {
    let body = symbol.strip_prefix("O:").unwrap_or(symbol);
    if body.len() < 16 {
        bail!("option symbol too short: {}", symbol);
    }

    let (head, strike_digits) = body.split_at(body.len() - 8);
    if !strike_digits.bytes().all(|b| b.is_ascii_digit()) {
        bail!("non-numeric strike in {}", symbol);
    }
    let strike = strike_digits.parse::<u64>()? as f64 / 1000.0;

    let (head, side_char) = head.split_at(head.len() - 1);
    let side = match side_char {
        "C" => OptionSide::Call,
        "P" => OptionSide::Put,
        other => bail!("bad side '{}' in {}", other, symbol),
    };

    let (ticker, date_digits) = head.split_at(head.len() - 6);
    if ticker.is_empty() || !ticker.bytes().all(|b| b.is_ascii_alphanumeric()) {
        bail!("bad ticker in {}", symbol);
    }
    let expiry = NaiveDate::parse_from_str(date_digits, "%y%m%d")
        .with_context(|| format!("bad expiry in {}", symbol))?;

    Ok(ParsedOptionSymbol {
        ticker: ticker.to_string(),
        expiry,
        side,
        strike,
    })
}

/// Stream counters, all monotonic since startup
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub prints_seen: u64,
    /// Stale or unparseable prints
    pub prints_dropped: u64,
    pub sweeps_detected: u64,
    pub alerts_published: u64,
    pub last_print_at: Option<DateTime<Utc>>,
}

pub struct SweepDetector {
    provider: Arc<dyn MarketData>,
    vol_cache: Arc<crate::volatility::VolatilityCache>,
    config: Arc<Config>,
    scorer: CompositeScorer,
    buffer: Mutex<VecDeque<SweepAlert>>,
    alert_tx: broadcast::Sender<SweepAlert>,
    prints_seen: AtomicU64,
    prints_dropped: AtomicU64,
    sweeps_detected: AtomicU64,
    alerts_published: AtomicU64,
    last_print_at: Mutex<Option<DateTime<Utc>>>,
}

impl SweepDetector {
    pub fn new(
        provider: Arc<dyn MarketData>,
        vol_cache: Arc<crate::volatility::VolatilityCache>,
        config: Arc<Config>,
    ) -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        SweepDetector {
            scorer: CompositeScorer::new(config.scoring.clone()),
            provider,
            vol_cache,
            config,
            buffer: Mutex::new(VecDeque::new()),
            alert_tx,
            prints_seen: AtomicU64::new(0),
            prints_dropped: AtomicU64::new(0),
            sweeps_detected: AtomicU64::new(0),
            alerts_published: AtomicU64::new(0),
            last_print_at: Mutex::new(None),
        }
    }

    /// Receiver for high-confidence alerts (total at or above the sweep
    /// threshold with enough active layers)
    pub fn subscribe(&self) -> broadcast::Receiver<SweepAlert> {
        self.alert_tx.subscribe()
    }

    pub fn stats(&self) -> SweepStats {
        SweepStats {
            prints_seen: self.prints_seen.load(Ordering::SeqCst),
            prints_dropped: self.prints_dropped.load(Ordering::SeqCst),
            sweeps_detected: self.sweeps_detected.load(Ordering::SeqCst),
            alerts_published: self.alerts_published.load(Ordering::SeqCst),
            last_print_at: *self.last_print_at.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Stream is healthy while prints keep arriving inside the staleness
    /// window. Quiet tape and dead feed look the same here; the caller
    /// only uses this for logging.
    pub fn is_stream_healthy(&self, now: DateTime<Utc>) -> bool {
        self.last_print_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| (now - at).num_seconds() <= self.config.sweep.stale_print_secs)
            .unwrap_or(false)
    }

    /// Alerts still inside the retention window, newest first
    pub fn recent_alerts(&self, now: DateTime<Utc>) -> Vec<SweepAlert> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict_expired(&mut buffer, now, self.config.sweep.retention_secs);
        buffer.iter().rev().cloned().collect()
    }

    /// Drain the tape channel until the sender hangs up
    pub async fn run(&self, mut prints: mpsc::Receiver<TradePrint>) {
        info!(
            "👂 Sweep detector listening: watch list {:?}, min notional ${:.0}",
            self.config.sweep.watch_list, self.config.sweep.min_notional
        );
        while let Some(print) = prints.recv().await {
            self.process_print(print).await;
        }
        info!("👂 Tape stream closed, sweep detector stopping");
    }

    pub async fn process_print(&self, print: TradePrint) {
        self.process_print_at(print, Utc::now()).await
    }

    /// Gate one print and, if it qualifies, score it and record the alert.
    pub async fn process_print_at(&self, print: TradePrint, now: DateTime<Utc>) {
        self.prints_seen.fetch_add(1, Ordering::SeqCst);

        if (now - print.timestamp).num_seconds() > self.config.sweep.stale_print_secs {
            self.prints_dropped.fetch_add(1, Ordering::SeqCst);
            debug!("🕰️  Stale print dropped: {}", print.option_symbol);
            return;
        }
        // replayed or stale prints must not move the health marker
        *self.last_print_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(print.timestamp);

        let parsed = match parse_option_symbol(&print.option_symbol) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.prints_dropped.fetch_add(1, Ordering::SeqCst);
                debug!("🚮 Unparseable print dropped: {:#}", e);
                return;
            }
        };

        if !self
            .config
            .sweep
            .watch_list
            .iter()
            .any(|t| t == &parsed.ticker)
        {
            return;
        }

        let notional = print.size as f64 * print.price * 100.0;
        if notional < self.config.sweep.min_notional {
            return;
        }

        if !print
            .condition_codes
            .iter()
            .any(|c| self.config.sweep.sweep_condition_codes.contains(c))
        {
            return;
        }

        self.sweeps_detected.fetch_add(1, Ordering::SeqCst);
        info!(
            "💥 Sweep: {} {} {} {} x ${:.2} = ${:.0}",
            parsed.ticker, parsed.strike, parsed.side, print.size, print.price, notional
        );

        let mut alert = SweepAlert {
            ticker: parsed.ticker.clone(),
            strike: parsed.strike,
            expiry: parsed.expiry,
            side: parsed.side,
            print_size: print.size,
            print_price: print.price,
            notional,
            condition_codes: print.condition_codes.clone(),
            score: None,
            candidate: None,
            detected_at: now,
        };

        // Scoring needs live context; a failed fetch still records the raw
        // sweep so the tape history stays complete.
        match self.evaluate_sweep(&parsed, &print, notional, now).await {
            Ok((score, candidate)) => {
                let eligible = score.eligible(
                    self.config.scoring.sweep_min_total_score,
                    self.config.scoring.min_active_layers,
                );
                alert.score = Some(score.clone());
                alert.candidate = candidate;
                if eligible {
                    self.alerts_published.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "🚨 Sweep alert {} {} {}: {:.1}/{:.1} [{}]",
                        alert.ticker,
                        alert.strike,
                        alert.side,
                        score.total,
                        self.scorer.max_total(),
                        score.breakdown()
                    );
                    let _ = self.alert_tx.send(alert.clone());
                }
            }
            Err(e) => {
                warn!("⚠️  Sweep context fetch failed for {}: {:#}", parsed.ticker, e);
            }
        }

        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push_back(alert);
        Self::evict_expired(&mut buffer, now, self.config.sweep.retention_secs);
    }

    async fn evaluate_sweep(
        &self,
        parsed: &ParsedOptionSymbol,
        print: &TradePrint,
        notional: f64,
        now: DateTime<Utc>,
    ) -> Result<(crate::types::ScoreComponents, Option<crate::types::Candidate>)> {
        let spot = self
            .provider
            .get_current_price(&parsed.ticker)
            .await
            .with_context(|| format!("price fetch for {}", parsed.ticker))?;
        let chain = self
            .provider
            .get_chain_snapshot(&parsed.ticker)
            .await
            .with_context(|| format!("chain fetch for {}", parsed.ticker))?;
        let at_expiry: Vec<_> = chain
            .iter()
            .filter(|q| q.expiry == parsed.expiry)
            .cloned()
            .collect();

        let sigma = self.vol_cache.current_vol(&parsed.ticker);
        let vol_rank = self.vol_cache.percentile_rank(&parsed.ticker, sigma);
        let max_pain = signals::max_pain_strike(&at_expiry);
        let skew = signals::iv_skew(&at_expiry, spot);
        let rsi = self
            .vol_cache
            .closes(&parsed.ticker)
            .and_then(|closes| signals::rsi(&closes, RSI_PERIOD));

        // the swept contract itself, or a synthetic quote off the print
        // when the snapshot does not carry it
        let quote = at_expiry
            .iter()
            .find(|q| {
                q.side == parsed.side && (q.strike - parsed.strike).abs() < 1e-9
            })
            .cloned()
            .unwrap_or_else(|| OptionQuote {
                underlying: parsed.ticker.clone(),
                strike: parsed.strike,
                expiry: parsed.expiry,
                side: parsed.side,
                bid: print.price,
                ask: print.price,
                last_size: print.size,
                volume: print.size,
                open_interest: 0,
                implied_vol: 0.0,
            });

        let tte = time_to_expiry_for(parsed.expiry, now, &self.config.window);
        let iv = if quote.implied_vol > 0.0 {
            quote.implied_vol
        } else {
            sigma
        };
        let greeks = pricing::greeks(
            spot,
            parsed.strike,
            tte,
            self.config.scan.risk_free_rate,
            iv,
            parsed.side,
        );

        let ctx = ContractContext {
            spot,
            mode: determine_target_expiry(now, &self.config.window).mode,
            time_to_expiry_years: tte,
            days_to_expiry: days_to_expiry_for(parsed.expiry, now),
            risk_free_rate: self.config.scan.risk_free_rate,
            iv,
            greeks,
            vol_rank,
            iv_ceiling: self.config.iv_ceiling_for(&parsed.ticker),
            max_pain,
            skew,
            rsi,
            flow: FlowSignal::SweepPrint {
                notional,
                min_notional: self.config.sweep.min_notional,
            },
        };

        let score = self.scorer.score(&quote, &ctx);
        let candidate = if score.eligible(
            self.config.scoring.sweep_min_total_score,
            self.config.scoring.min_active_layers,
        ) {
            Some(build_candidate(&quote, &ctx, score.clone(), &self.config.filters))
        } else {
            None
        };
        Ok((score, candidate))
    }

    fn evict_expired(buffer: &mut VecDeque<SweepAlert>, now: DateTime<Utc>, retention_secs: i64) {
        let horizon = now - Duration::seconds(retention_secs);
        while let Some(front) = buffer.front() {
            if front.detected_at < horizon {
                buffer.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::StaticMarketData;
    use crate::types::Bar;
    use crate::volatility::VolatilityCache;
    use chrono::TimeZone;

    #[test]
    fn test_parse_call_symbol() {
        let parsed = parse_option_symbol("O:SPY250303C00450000").unwrap();
        assert_eq!(parsed.ticker, "SPY");
        assert_eq!(parsed.expiry, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(parsed.side, OptionSide::Call);
        assert_eq!(parsed.strike, 450.0);
    }

    #[test]
    fn test_parse_put_fractional_strike_no_prefix() {
        let parsed = parse_option_symbol("QQQ241220P00382500").unwrap();
        assert_eq!(parsed.ticker, "QQQ");
        assert_eq!(parsed.side, OptionSide::Put);
        assert_eq!(parsed.strike, 382.5);
    }

    #[test]
    fn test_parse_rejects_malformed_symbols() {
        assert!(parse_option_symbol("O:SPY").is_err());
        assert!(parse_option_symbol("SPY250303X00450000").is_err());
        assert!(parse_option_symbol("SPY259999C00450000").is_err());
        assert!(parse_option_symbol("SPY250303C0045000Z").is_err());
        assert!(parse_option_symbol("250303C00450000").is_err());
    }

    fn fixed_now() -> DateTime<Utc> {
        // Monday 2025-03-03 10:00 ET
        Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap()
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn quote(strike: f64, side: OptionSide, iv: f64, volume: u64, oi: u64) -> OptionQuote {
        OptionQuote {
            underlying: "SPY".to_string(),
            strike,
            expiry: expiry(),
            side,
            bid: 2.40,
            ask: 2.50,
            last_size: 10,
            volume,
            open_interest: oi,
            implied_vol: iv,
        }
    }

    fn chain() -> Vec<OptionQuote> {
        vec![
            quote(445.0, OptionSide::Put, 0.22, 100, 10_000),
            quote(450.0, OptionSide::Put, 0.22, 100, 1_000),
            quote(450.0, OptionSide::Call, 0.18, 3_000, 5_000),
            quote(455.0, OptionSide::Call, 0.18, 100, 10_000),
        ]
    }

    fn bars(n: usize) -> Vec<Bar> {
        let mut out = Vec::new();
        let mut price = 430.0;
        let day0 = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        for i in 0..n {
            let amp = 0.015 - 0.009 * i as f64 / n as f64;
            price *= if i % 2 == 0 { 1.0 + amp } else { 1.0 - amp };
            out.push(Bar {
                date: day0 + Duration::days(i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1_000_000,
            });
        }
        out
    }

    fn detector() -> SweepDetector {
        let provider = StaticMarketData::new()
            .with_price("SPY", 450.2)
            .with_chain("SPY", chain());
        let config = Arc::new(Config::default());
        let vol_cache = Arc::new(VolatilityCache::new(config.volatility.clone()));
        let mut history = std::collections::HashMap::new();
        history.insert("SPY".to_string(), bars(120));
        vol_cache.refresh(&["SPY".to_string()], &history, expiry());
        SweepDetector::new(Arc::new(provider), vol_cache, config)
    }

    fn sweep_print(size: u64, price: f64, codes: Vec<i32>) -> TradePrint {
        TradePrint {
            option_symbol: "O:SPY250303C00450000".to_string(),
            size,
            price,
            condition_codes: codes,
            timestamp: fixed_now(),
        }
    }

    #[tokio::test]
    async fn test_qualifying_sweep_publishes_alert() {
        let detector = detector();
        let mut alerts = detector.subscribe();

        // 120 x $2.50 x 100 = $30,000 notional, sweep condition code
        detector
            .process_print_at(sweep_print(120, 2.50, vec![14]), fixed_now())
            .await;

        let stats = detector.stats();
        assert_eq!(stats.prints_seen, 1);
        assert_eq!(stats.sweeps_detected, 1);
        assert_eq!(stats.alerts_published, 1);

        let alert = alerts.try_recv().expect("alert on the channel");
        assert_eq!(alert.ticker, "SPY");
        assert_eq!(alert.strike, 450.0);
        assert_eq!(alert.side, OptionSide::Call);
        assert_eq!(alert.notional, 30_000.0);
        let score = alert.score.expect("scored");
        assert!(score.flow > 0.0, "a real print always carries the flow layer");
        assert!(score.gamma_trap > 0.0, "spot 450.2 pins near max pain 450");
        assert!(score.skew_inversion > 0.0);
        assert!(alert.candidate.is_some());

        let recent = detector.recent_alerts(fixed_now());
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_small_print_ignored() {
        let detector = detector();
        // 10 x $2.50 x 100 = $2,500, well under the notional floor
        detector
            .process_print_at(sweep_print(10, 2.50, vec![14]), fixed_now())
            .await;
        let stats = detector.stats();
        assert_eq!(stats.prints_seen, 1);
        assert_eq!(stats.sweeps_detected, 0);
        assert!(detector.recent_alerts(fixed_now()).is_empty());
    }

    #[tokio::test]
    async fn test_non_sweep_condition_codes_ignored() {
        let detector = detector();
        detector
            .process_print_at(sweep_print(120, 2.50, vec![1, 7]), fixed_now())
            .await;
        assert_eq!(detector.stats().sweeps_detected, 0);
    }

    #[tokio::test]
    async fn test_off_watch_list_ignored() {
        let detector = detector();
        let print = TradePrint {
            option_symbol: "O:GME250303C00045000".to_string(),
            size: 500,
            price: 5.0,
            condition_codes: vec![14],
            timestamp: fixed_now(),
        };
        detector.process_print_at(print, fixed_now()).await;
        assert_eq!(detector.stats().sweeps_detected, 0);
    }

    #[tokio::test]
    async fn test_stale_print_dropped() {
        let detector = detector();
        let mut print = sweep_print(120, 2.50, vec![14]);
        print.timestamp = fixed_now() - Duration::seconds(120);
        detector.process_print_at(print, fixed_now()).await;
        assert_eq!(detector.stats().prints_seen, 1);
        assert_eq!(detector.stats().prints_dropped, 1);
        assert_eq!(detector.stats().sweeps_detected, 0);
    }

    #[tokio::test]
    async fn test_unparseable_print_counted_as_dropped() {
        let detector = detector();
        let print = TradePrint {
            option_symbol: "garbage".to_string(),
            size: 500,
            price: 5.0,
            condition_codes: vec![14],
            timestamp: fixed_now(),
        };
        detector.process_print_at(print, fixed_now()).await;
        assert_eq!(detector.stats().prints_dropped, 1);
        assert_eq!(detector.stats().sweeps_detected, 0);
    }

    #[tokio::test]
    async fn test_retention_evicts_old_alerts() {
        let detector = detector();
        detector
            .process_print_at(sweep_print(120, 2.50, vec![14]), fixed_now())
            .await;
        assert_eq!(detector.recent_alerts(fixed_now()).len(), 1);

        let later = fixed_now() + Duration::seconds(detector.config.sweep.retention_secs + 1);
        assert!(detector.recent_alerts(later).is_empty());
    }

    #[tokio::test]
    async fn test_context_failure_still_records_sweep() {
        let provider = StaticMarketData::new().with_failure("SPY");
        let config = Arc::new(Config::default());
        let vol_cache = Arc::new(VolatilityCache::new(config.volatility.clone()));
        let detector = SweepDetector::new(Arc::new(provider), vol_cache, config);

        detector
            .process_print_at(sweep_print(120, 2.50, vec![14]), fixed_now())
            .await;
        assert_eq!(detector.stats().sweeps_detected, 1);
        assert_eq!(detector.stats().alerts_published, 0);

        let recent = detector.recent_alerts(fixed_now());
        assert_eq!(recent.len(), 1);
        assert!(recent[0].score.is_none(), "no market context, raw sweep only");
    }

    #[tokio::test]
    async fn test_stream_health_tracking() {
        let detector = detector();
        assert!(!detector.is_stream_healthy(fixed_now()));

        detector
            .process_print_at(sweep_print(1, 0.05, Vec::new()), fixed_now())
            .await;
        assert!(detector.is_stream_healthy(fixed_now()));
        assert!(!detector.is_stream_healthy(fixed_now() + Duration::seconds(300)));
    }

    #[tokio::test]
    async fn test_stale_print_does_not_mark_stream_healthy() {
        let detector = detector();
        let mut print = sweep_print(120, 2.50, vec![14]);
        print.timestamp = fixed_now() - Duration::seconds(120);
        detector.process_print_at(print, fixed_now()).await;
        assert!(
            !detector.is_stream_healthy(fixed_now()),
            "a replayed stale print must not move the health marker"
        );
        assert!(detector.stats().last_print_at.is_none());
    }
}
