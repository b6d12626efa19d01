//! Per-symbol auxiliary signals computed once per scan pass.
//!
//! All three run off data already fetched for pricing (the chain snapshot
//! and the daily bars behind the volatility cache); none of them makes a
//! network call.

use crate::types::{OptionQuote, OptionSide};

/// Fraction of spot defining the near-the-money band for skew
const SKEW_MONEYNESS_BAND: f64 = 0.05;

/// Strike minimizing aggregate option-writer payout at expiry,
/// approximated via open-interest concentration across the chain.
pub fn max_pain_strike(chain: &[OptionQuote]) -> Option<f64> {
    let mut strikes: Vec<f64> = chain.iter().map(|q| q.strike).collect();
    strikes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    strikes.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    if strikes.is_empty() || chain.iter().all(|q| q.open_interest == 0) {
        return None;
    }

    let mut best: Option<(f64, f64)> = None;
    for &settle in &strikes {
        let mut pain = 0.0;
        for quote in chain {
            let oi = quote.open_interest as f64;
            pain += match quote.side {
                OptionSide::Call => (settle - quote.strike).max(0.0) * oi,
                OptionSide::Put => (quote.strike - settle).max(0.0) * oi,
            };
        }
        match best {
            Some((_, best_pain)) if pain >= best_pain => {}
            _ => best = Some((settle, pain)),
        }
    }
    best.map(|(strike, _)| strike)
}

/// Average call-side and put-side IV near the money
#[derive(Debug, Clone, Copy)]
pub struct SkewSnapshot {
    pub call_iv: f64,
    pub put_iv: f64,
}

/// Mean call and put IV across strikes within 5% of spot.
/// `None` when either side has no usable IVs.
pub fn iv_skew(chain: &[OptionQuote], spot: f64) -> Option<SkewSnapshot> {
    if spot <= 0.0 {
        return None;
    }
    let mut call_sum = 0.0;
    let mut call_n = 0usize;
    let mut put_sum = 0.0;
    let mut put_n = 0usize;
    for quote in chain {
        if quote.implied_vol <= 0.0 {
            continue;
        }
        if (quote.strike - spot).abs() / spot > SKEW_MONEYNESS_BAND {
            continue;
        }
        match quote.side {
            OptionSide::Call => {
                call_sum += quote.implied_vol;
                call_n += 1;
            }
            OptionSide::Put => {
                put_sum += quote.implied_vol;
                put_n += 1;
            }
        }
    }
    if call_n == 0 || put_n == 0 {
        return None;
    }
    Some(SkewSnapshot {
        call_iv: call_sum / call_n as f64,
        put_iv: put_sum / put_n as f64,
    })
}

/// RSI over daily closes with Wilder smoothing.
/// Needs at least `period + 1` closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period]
        .iter()
        .map(|d| d.max(0.0))
        .sum::<f64>()
        / period as f64;
    let mut avg_loss = deltas[..period]
        .iter()
        .map(|d| (-d).max(0.0))
        .sum::<f64>()
        / period as f64;

    for delta in &deltas[period..] {
        avg_gain = (avg_gain * (period as f64 - 1.0) + delta.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + (-delta).max(0.0)) / period as f64;
    }

    if avg_loss <= 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn quote(strike: f64, side: OptionSide, oi: u64, iv: f64) -> OptionQuote {
        OptionQuote {
            underlying: "SPY".to_string(),
            strike,
            expiry: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            side,
            bid: 1.0,
            ask: 1.1,
            last_size: 0,
            volume: 100,
            open_interest: oi,
            implied_vol: iv,
        }
    }

    #[test]
    fn test_max_pain_concentrates_on_heavy_oi() {
        // Heavy put OI at 445 and call OI at 455 pins pain near the middle
        let chain = vec![
            quote(445.0, OptionSide::Put, 10_000, 0.2),
            quote(450.0, OptionSide::Put, 1_000, 0.2),
            quote(450.0, OptionSide::Call, 1_000, 0.2),
            quote(455.0, OptionSide::Call, 10_000, 0.2),
        ];
        let pain = max_pain_strike(&chain).expect("pain strike");
        assert_eq!(pain, 450.0);
    }

    #[test]
    fn test_max_pain_requires_open_interest() {
        let chain = vec![
            quote(445.0, OptionSide::Put, 0, 0.2),
            quote(455.0, OptionSide::Call, 0, 0.2),
        ];
        assert!(max_pain_strike(&chain).is_none());
        assert!(max_pain_strike(&[]).is_none());
    }

    #[test]
    fn test_iv_skew_near_the_money_only() {
        let chain = vec![
            quote(450.0, OptionSide::Call, 100, 0.18),
            quote(450.0, OptionSide::Put, 100, 0.22),
            // 20% away from spot, ignored
            quote(540.0, OptionSide::Call, 100, 0.90),
        ];
        let skew = iv_skew(&chain, 450.0).expect("skew");
        assert!((skew.call_iv - 0.18).abs() < 1e-12);
        assert!((skew.put_iv - 0.22).abs() < 1e-12);
        assert!(skew.call_iv < skew.put_iv);
    }

    #[test]
    fn test_iv_skew_missing_side() {
        let chain = vec![quote(450.0, OptionSide::Call, 100, 0.18)];
        assert!(iv_skew(&chain, 450.0).is_none());
    }

    #[test]
    fn test_rsi_extremes_and_bounds() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let low = rsi(&falling, 14).unwrap();
        assert!(low < 1.0, "straight decline should pin RSI near 0, got {low}");

        let mut mixed = Vec::new();
        for i in 0..40 {
            mixed.push(100.0 + if i % 2 == 0 { 1.0 } else { -0.5 });
        }
        let mid = rsi(&mixed, 14).unwrap();
        assert!((0.0..=100.0).contains(&mid));
    }

    #[test]
    fn test_rsi_insufficient_history() {
        assert!(rsi(&[100.0, 101.0], 14).is_none());
        assert!(rsi(&[], 14).is_none());
    }
}
