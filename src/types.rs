//! Core domain types shared across the engine.
//!
//! Vendor chain payloads are validated into strict `OptionQuote` structs at
//! the ingestion boundary; everything downstream works with typed values.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::pricing::Greeks;

/// Option side (call or put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Call => "call",
            OptionSide::Put => "put",
        }
    }
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed option contract at a point in time.
///
/// Immutable snapshot: created per fetch, superseded by the next fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Underlying ticker (e.g. "SPY")
    pub underlying: String,
    /// Strike price
    pub strike: f64,
    /// Expiry date
    pub expiry: NaiveDate,
    /// Call or put
    pub side: OptionSide,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
    /// Last trade size (contracts)
    pub last_size: u64,
    /// Session volume (contracts)
    pub volume: u64,
    /// Open interest (contracts)
    pub open_interest: u64,
    /// Vendor implied volatility (0.0 when the vendor omits it)
    pub implied_vol: f64,
}

impl OptionQuote {
    /// Mid price of bid/ask
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Bid/ask spread
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Validate one vendor chain record into a strict quote.
    ///
    /// Symbol, strike, expiry and side are required; the record is dropped
    /// when any of them is missing or malformed. Bid/ask/volume/OI/IV are
    /// defaulted to zero when absent or negative.
    pub fn from_chain_value(value: &serde_json::Value) -> Option<OptionQuote> {
        let underlying = value.get("underlying")?.as_str()?.to_string();
        if underlying.is_empty() {
            return None;
        }
        let strike = value.get("strike")?.as_f64()?;
        if strike <= 0.0 || !strike.is_finite() {
            return None;
        }
        let expiry =
            NaiveDate::parse_from_str(value.get("expiry")?.as_str()?, "%Y-%m-%d").ok()?;
        let side = match value.get("side")?.as_str()? {
            "call" => OptionSide::Call,
            "put" => OptionSide::Put,
            _ => return None,
        };

        let non_neg = |key: &str| -> f64 {
            value
                .get(key)
                .and_then(|v| v.as_f64())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(0.0)
        };
        let count = |key: &str| -> u64 {
            value.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
        };

        Some(OptionQuote {
            underlying,
            strike,
            expiry,
            side,
            bid: non_neg("bid"),
            ask: non_neg("ask"),
            last_size: count("last_size"),
            volume: count("volume"),
            open_interest: count("open_interest"),
            implied_vol: non_neg("implied_vol"),
        })
    }
}

/// One daily OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A single option trade print from the tape stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePrint {
    /// OCC-style option symbol (e.g. "O:SPY240830C00450000")
    pub option_symbol: String,
    /// Trade size in contracts
    pub size: u64,
    /// Trade price per contract
    pub price: f64,
    /// Exchange condition codes
    pub condition_codes: Vec<i32>,
    /// Exchange timestamp
    pub timestamp: DateTime<Utc>,
}

/// Composite score: four all-or-nothing layers plus the derived total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// Layer A: spot pinned near the max-pain strike
    pub gamma_trap: f64,
    /// Layer B: call IV trading below scaled put IV
    pub skew_inversion: f64,
    /// Layer C: unusual flow (volume/OI ratio in batch, real prints in sweep)
    pub flow: f64,
    /// Layer D: RSI extreme with short-dated expiry
    pub momentum: f64,
    /// Sum of the four layers
    pub total: f64,
}

impl ScoreComponents {
    /// Number of layers that contributed points
    pub fn active_layers(&self) -> usize {
        [self.gamma_trap, self.skew_inversion, self.flow, self.momentum]
            .iter()
            .filter(|v| **v > 0.0)
            .count()
    }

    /// A candidate qualifies only on total score AND layer breadth.
    /// The two-layer minimum guards against single-signal false positives.
    pub fn eligible(&self, min_total: f64, min_layers: usize) -> bool {
        self.total >= min_total && self.active_layers() >= min_layers
    }

    /// Breakdown string for logging
    pub fn breakdown(&self) -> String {
        let mut parts = Vec::new();
        if self.gamma_trap > 0.0 {
            parts.push(format!("pain:{:.1}", self.gamma_trap));
        }
        if self.skew_inversion > 0.0 {
            parts.push(format!("skew:{:.1}", self.skew_inversion));
        }
        if self.flow > 0.0 {
            parts.push(format!("flow:{:.1}", self.flow));
        }
        if self.momentum > 0.0 {
            parts.push(format!("mom:{:.1}", self.momentum));
        }
        if parts.is_empty() {
            "no layers".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// A scored, filter-passing trade candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub underlying: String,
    pub strike: f64,
    pub side: OptionSide,
    pub expiry: NaiveDate,
    /// Entry premium (bid/ask mid at evaluation time)
    pub entry_premium: f64,
    /// Target premium (entry x target multiplier)
    pub target_premium: f64,
    /// Stop premium (entry x stop multiplier)
    pub stop_premium: f64,
    /// Underlying price at evaluation time
    pub spot: f64,
    pub greeks: Greeks,
    pub score: ScoreComponents,
    pub volume: u64,
    pub open_interest: u64,
    /// Implied (or estimated) volatility used for evaluation
    pub implied_vol: f64,
}

/// Result of one full universe scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Top-ranked candidates, best first
    pub candidates: Vec<Candidate>,
    pub scan_time_ms: u64,
    pub symbols_analyzed: usize,
    /// Symbols that produced at least one eligible candidate
    pub symbols_passed: usize,
    pub timestamp: DateTime<Utc>,
    /// False when the scan hit its deadline (partial results) or was
    /// rejected because another scan was already in flight
    pub complete: bool,
}

impl ScanOutcome {
    /// Empty outcome for a rejected re-entrant scan call
    pub fn rejected() -> Self {
        ScanOutcome {
            candidates: Vec::new(),
            scan_time_ms: 0,
            symbols_analyzed: 0,
            symbols_passed: 0,
            timestamp: Utc::now(),
            complete: false,
        }
    }
}

/// A sweep print that cleared the notional and condition-code gates.
///
/// `score`/`candidate` are filled in when the on-demand evaluation
/// succeeded; they stay `None` when the snapshot fetch failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepAlert {
    pub ticker: String,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub side: OptionSide,
    /// Originating print
    pub print_size: u64,
    pub print_price: f64,
    /// size x price x 100
    pub notional: f64,
    pub condition_codes: Vec<i32>,
    pub score: Option<ScoreComponents>,
    pub candidate: Option<Candidate>,
    pub detected_at: DateTime<Utc>,
}
