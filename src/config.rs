//! Configuration for the signal engine.
//!
//! Loads from environment variables (via .env) with defaults in code.
//! Every strategy parameter (filter thresholds, layer points, score
//! thresholds, premium multipliers) is injectable here rather than
//! hard-coded at call sites, since the two scoring paths tune them
//! independently.

use anyhow::{bail, Context, Result};
use std::env;

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub scan: ScanConfig,
    pub filters: FilterConfig,
    pub scoring: ScoringConfig,
    pub sweep: SweepConfig,
    pub window: WindowConfig,
    pub volatility: VolatilityConfig,
}

/// Batch scan orchestration parameters
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Symbol universe to scan
    pub universe: Vec<String>,
    /// Symbols fetched concurrently per batch
    pub batch_size: usize,
    /// Hard wall-clock deadline for a whole scan (seconds)
    pub timeout_secs: u64,
    /// Candidates returned after ranking
    pub top_n: usize,
    /// Interval between scan cycles in the service loop (seconds)
    pub interval_secs: u64,
    /// Annualized risk-free rate used by the pricing kernel
    pub risk_free_rate: f64,
}

/// Mode-specific hard filter thresholds (same-day vs next-day expiry)
#[derive(Debug, Clone)]
pub struct FilterThresholds {
    /// Maximum bid/ask spread in dollars
    pub max_spread: f64,
    /// Minimum session volume (contracts)
    pub min_volume: u64,
    /// Minimum open interest (contracts)
    pub min_open_interest: u64,
    /// Absolute delta band
    pub delta_min: f64,
    pub delta_max: f64,
    /// Theta must be at or below this cutoff (more negative = faster decay)
    pub theta_cutoff: f64,
    /// Gamma must be at or above this floor
    pub gamma_floor: f64,
}

/// Funnel filter configuration
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Premium band applied to the bid/ask mid
    pub min_premium: f64,
    pub max_premium: f64,
    pub same_day: FilterThresholds,
    pub next_day: FilterThresholds,
    /// IV ceiling for broad-market index proxies
    pub iv_ceiling_index: f64,
    /// IV ceiling for everything else
    pub iv_ceiling_default: f64,
    /// Symbols that get the tighter index ceiling
    pub index_symbols: Vec<String>,
    /// Volatility percentile rank must be below this (compression gate)
    pub max_percentile_rank: f64,
    /// Underlying move needed to hit target, as a fraction of spot
    pub max_move_pct: f64,
    /// Target premium = entry x this
    pub target_multiplier: f64,
    /// Stop premium = entry x this
    pub stop_multiplier: f64,
}

/// Composite layer points and gates
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Layer A points: spot within `max_pain_proximity_pct` of max pain
    pub gamma_trap_points: f64,
    pub max_pain_proximity_pct: f64,
    /// Layer B points: call IV < put IV x `skew_factor`
    pub skew_points: f64,
    pub skew_factor: f64,
    /// Layer C points: volume > OI x `flow_volume_oi_ratio` (batch path)
    pub flow_points: f64,
    pub flow_volume_oi_ratio: f64,
    /// Layer D points: RSI extreme AND DTE <= `momentum_max_dte`
    pub momentum_points: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub momentum_max_dte: i64,
    /// Batch-path eligibility threshold
    pub min_total_score: f64,
    /// Sweep-path (high confidence) threshold, stricter than the batch one
    pub sweep_min_total_score: f64,
    /// Minimum non-zero layers for eligibility
    pub min_active_layers: usize,
}

/// Sweep detector configuration
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Liquid tickers the tape stream is restricted to
    pub watch_list: Vec<String>,
    /// Minimum notional (size x price x 100) in dollars
    pub min_notional: f64,
    /// Exchange condition codes treated as sweep executions
    pub sweep_condition_codes: Vec<i32>,
    /// Alerts older than this are evicted from the rolling buffer (seconds)
    pub retention_secs: i64,
    /// Prints older than this are dropped as stale (seconds)
    pub stale_print_secs: i64,
}

/// Time-window policy parameters (all times US/Eastern)
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// At/after this hour the engine targets next-day expiry
    pub cutoff_hour: u32,
    /// Same-day exit time (hour, minute)
    pub same_day_exit: (u32, u32),
    /// Next-day exit time (hour, minute)
    pub next_day_exit: (u32, u32),
    /// Floor for time-to-expiry in years
    pub min_tte_years: f64,
}

/// Volatility distribution cache parameters
#[derive(Debug, Clone)]
pub struct VolatilityConfig {
    /// Fallback annualized volatility when history is unavailable
    pub default_vol: f64,
    /// Calendar days of history fetched per refresh
    pub history_days: i64,
    /// Realized-vol window in trading days
    pub window_days: usize,
    /// Maximum distribution samples kept
    pub max_samples: usize,
}

impl Config {
    /// Load configuration from environment variables, with defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        Ok(Config {
            scan: ScanConfig {
                universe: get_env_list(
                    "SCAN_UNIVERSE",
                    "SPY,QQQ,IWM,AAPL,MSFT,NVDA,AMD,TSLA,META,AMZN,GOOGL,NFLX",
                ),
                batch_size: get_env_usize("SCAN_BATCH_SIZE", 50)?,
                timeout_secs: get_env_u64("SCAN_TIMEOUT_SECS", 30)?,
                top_n: get_env_usize("SCAN_TOP_N", 3)?,
                interval_secs: get_env_u64("SCAN_INTERVAL_SECS", 300)?,
                risk_free_rate: get_env_f64("RISK_FREE_RATE", 0.045)?,
            },
            filters: FilterConfig {
                min_premium: get_env_f64("MIN_PREMIUM", 0.30)?,
                max_premium: get_env_f64("MAX_PREMIUM", 5.00)?,
                same_day: FilterThresholds {
                    max_spread: get_env_f64("SD_MAX_SPREAD", 0.10)?,
                    min_volume: get_env_u64("SD_MIN_VOLUME", 500)?,
                    min_open_interest: get_env_u64("SD_MIN_OPEN_INTEREST", 1000)?,
                    delta_min: get_env_f64("SD_DELTA_MIN", 0.35)?,
                    delta_max: get_env_f64("SD_DELTA_MAX", 0.65)?,
                    theta_cutoff: get_env_f64("SD_THETA_CUTOFF", -0.05)?,
                    gamma_floor: get_env_f64("SD_GAMMA_FLOOR", 0.05)?,
                },
                next_day: FilterThresholds {
                    max_spread: get_env_f64("ND_MAX_SPREAD", 0.15)?,
                    min_volume: get_env_u64("ND_MIN_VOLUME", 200)?,
                    min_open_interest: get_env_u64("ND_MIN_OPEN_INTEREST", 500)?,
                    delta_min: get_env_f64("ND_DELTA_MIN", 0.30)?,
                    delta_max: get_env_f64("ND_DELTA_MAX", 0.70)?,
                    theta_cutoff: get_env_f64("ND_THETA_CUTOFF", -0.03)?,
                    gamma_floor: get_env_f64("ND_GAMMA_FLOOR", 0.03)?,
                },
                iv_ceiling_index: get_env_f64("IV_CEILING_INDEX", 0.60)?,
                iv_ceiling_default: get_env_f64("IV_CEILING_DEFAULT", 1.20)?,
                index_symbols: get_env_list("INDEX_SYMBOLS", "SPY,QQQ,IWM,DIA"),
                max_percentile_rank: get_env_f64("MAX_PERCENTILE_RANK", 40.0)?,
                max_move_pct: get_env_f64("MAX_MOVE_PCT", 0.015)?,
                target_multiplier: get_env_f64("TARGET_MULTIPLIER", 1.5)?,
                stop_multiplier: get_env_f64("STOP_MULTIPLIER", 0.5)?,
            },
            scoring: ScoringConfig {
                gamma_trap_points: get_env_f64("GAMMA_TRAP_POINTS", 3.0)?,
                max_pain_proximity_pct: get_env_f64("MAX_PAIN_PROXIMITY_PCT", 0.005)?,
                skew_points: get_env_f64("SKEW_POINTS", 2.0)?,
                skew_factor: get_env_f64("SKEW_FACTOR", 0.95)?,
                flow_points: get_env_f64("FLOW_POINTS", 2.0)?,
                flow_volume_oi_ratio: get_env_f64("FLOW_VOLUME_OI_RATIO", 0.5)?,
                momentum_points: get_env_f64("MOMENTUM_POINTS", 3.0)?,
                rsi_oversold: get_env_f64("RSI_OVERSOLD", 30.0)?,
                rsi_overbought: get_env_f64("RSI_OVERBOUGHT", 70.0)?,
                momentum_max_dte: get_env_i64("MOMENTUM_MAX_DTE", 2)?,
                min_total_score: get_env_f64("MIN_TOTAL_SCORE", 5.0)?,
                sweep_min_total_score: get_env_f64("SWEEP_MIN_TOTAL_SCORE", 7.0)?,
                min_active_layers: get_env_usize("MIN_ACTIVE_LAYERS", 2)?,
            },
            sweep: SweepConfig {
                watch_list: get_env_list("SWEEP_WATCH_LIST", "SPY,QQQ,AAPL,NVDA,TSLA,AMD"),
                min_notional: get_env_f64("SWEEP_MIN_NOTIONAL", 25000.0)?,
                sweep_condition_codes: get_env_list("SWEEP_CONDITION_CODES", "14,238")
                    .iter()
                    .filter_map(|s| s.parse().ok())
                    .collect(),
                retention_secs: get_env_i64("SWEEP_RETENTION_SECS", 1800)?,
                stale_print_secs: get_env_i64("SWEEP_STALE_PRINT_SECS", 60)?,
            },
            window: WindowConfig {
                cutoff_hour: get_env_u32("EXPIRY_CUTOFF_HOUR_ET", 14)?,
                same_day_exit: (
                    get_env_u32("SAME_DAY_EXIT_HOUR", 15)?,
                    get_env_u32("SAME_DAY_EXIT_MINUTE", 45)?,
                ),
                next_day_exit: (
                    get_env_u32("NEXT_DAY_EXIT_HOUR", 10)?,
                    get_env_u32("NEXT_DAY_EXIT_MINUTE", 30)?,
                ),
                min_tte_years: get_env_f64("MIN_TTE_YEARS", 0.0001)?,
            },
            volatility: VolatilityConfig {
                default_vol: get_env_f64("DEFAULT_VOL", 0.20)?,
                history_days: get_env_i64("VOL_HISTORY_DAYS", 380)?,
                window_days: get_env_usize("VOL_WINDOW_DAYS", 30)?,
                max_samples: get_env_usize("VOL_MAX_SAMPLES", 252)?,
            },
        })
    }

    /// Validate configuration values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.scan.universe.is_empty() {
            bail!("SCAN_UNIVERSE must not be empty");
        }
        if self.scan.batch_size == 0 {
            bail!("SCAN_BATCH_SIZE must be > 0");
        }
        if self.scan.timeout_secs == 0 {
            bail!("SCAN_TIMEOUT_SECS must be > 0");
        }
        if self.scan.top_n == 0 {
            bail!("SCAN_TOP_N must be > 0");
        }
        if self.filters.min_premium < 0.0 || self.filters.max_premium <= self.filters.min_premium {
            bail!("premium band must satisfy 0 <= MIN_PREMIUM < MAX_PREMIUM");
        }
        for (label, th) in [
            ("same-day", &self.filters.same_day),
            ("next-day", &self.filters.next_day),
        ] {
            if th.delta_min < 0.0 || th.delta_max > 1.0 || th.delta_min >= th.delta_max {
                bail!("{} delta band must satisfy 0 <= min < max <= 1", label);
            }
            if th.theta_cutoff > 0.0 {
                bail!("{} theta cutoff must be <= 0", label);
            }
        }
        if !(0.0..=100.0).contains(&self.filters.max_percentile_rank) {
            bail!("MAX_PERCENTILE_RANK must be within [0, 100]");
        }
        if self.filters.target_multiplier <= 1.0 {
            bail!("TARGET_MULTIPLIER must be > 1.0");
        }
        if !(0.0..1.0).contains(&self.filters.stop_multiplier) {
            bail!("STOP_MULTIPLIER must be within [0, 1)");
        }
        if self.scoring.skew_factor >= 1.0 {
            bail!("SKEW_FACTOR must be < 1.0 (inversion requires a discount)");
        }
        if self.scoring.sweep_min_total_score < self.scoring.min_total_score {
            bail!("SWEEP_MIN_TOTAL_SCORE must be >= MIN_TOTAL_SCORE");
        }
        if self.scoring.min_active_layers < 1 {
            bail!("MIN_ACTIVE_LAYERS must be >= 1");
        }
        if self.sweep.watch_list.is_empty() {
            bail!("SWEEP_WATCH_LIST must not be empty");
        }
        if self.sweep.min_notional <= 0.0 {
            bail!("SWEEP_MIN_NOTIONAL must be > 0");
        }
        if self.window.cutoff_hour >= 24 {
            bail!("EXPIRY_CUTOFF_HOUR_ET must be < 24");
        }
        if self.volatility.default_vol <= 0.0 {
            bail!("DEFAULT_VOL must be > 0");
        }
        if self.volatility.window_days < 2 {
            bail!("VOL_WINDOW_DAYS must be >= 2");
        }
        Ok(())
    }

    /// IV ceiling for a symbol (tighter for broad-market index proxies)
    pub fn iv_ceiling_for(&self, symbol: &str) -> f64 {
        if self.filters.index_symbols.iter().any(|s| s == symbol) {
            self.filters.iv_ceiling_index
        } else {
            self.filters.iv_ceiling_default
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // Defaults never fail to parse
        Config::from_env().expect("default configuration is valid")
    }
}

// Helper functions for environment variable parsing

fn get_env_list(key: &str, default: &str) -> Vec<String> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn get_env_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_i64(key: &str, default: i64) -> Result<i64> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(default))
        .context(format!("Invalid {} value", key))
}
