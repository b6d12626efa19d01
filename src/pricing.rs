//! Closed-form option pricing kernel.
//!
//! Black-Scholes premium, Greeks, implied volatility (Newton-Raphson) and
//! the inverse problem of solving the underlying price for a target
//! premium. The standard-normal CDF is the hot path (four-plus calls per
//! Greeks evaluation across tens of thousands of contracts per scan), so
//! all CDF evaluations interpolate against a dense erf lookup table built
//! once per process.
//!
//! Numeric policy: inputs are clamped before computation; at T <= 0 the
//! kernel degrades to intrinsic value and boundary Greeks. No path returns
//! NaN or infinity.

use std::collections::HashMap;
use std::f64::consts::SQRT_2;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::types::OptionSide;

/// Volatility bounds applied to every kernel input
pub const MIN_VOL: f64 = 0.001;
pub const MAX_VOL: f64 = 5.0;

const IV_MAX_ITERATIONS: usize = 100;
const IV_TOLERANCE: f64 = 1e-4;
const IV_INITIAL_GUESS: f64 = 0.30;

const ERF_MAX: f64 = 4.0;
const ERF_STEP: f64 = 1e-3;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Dense erf table over [-4, 4], built once per process.
static ERF_TABLE: Lazy<Vec<f64>> = Lazy::new(|| {
    let n = (2.0 * ERF_MAX / ERF_STEP).round() as usize + 1;
    (0..n)
        .map(|i| erf_series(-ERF_MAX + i as f64 * ERF_STEP))
        .collect()
});

/// Option sensitivities. Theta is per calendar day, vega per 1% vol point.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Abramowitz & Stegun 7.1.26 rational approximation (|err| < 1.5e-7).
/// Used to build the lookup table and as the agreement oracle in tests.
pub fn erf_series(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736
                + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Table-interpolated erf; out-of-domain inputs clamp to the table edges.
fn erf_lookup(x: f64) -> f64 {
    let table = &*ERF_TABLE;
    if x <= -ERF_MAX {
        return table[0];
    }
    if x >= ERF_MAX {
        return table[table.len() - 1];
    }
    let pos = (x + ERF_MAX) / ERF_STEP;
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    table[i] + (table[i + 1] - table[i]) * frac
}

/// Standard normal CDF via the erf lookup table
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf_lookup(x / SQRT_2))
}

/// Standard normal density
pub fn norm_pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

fn intrinsic(side: OptionSide, s: f64, k: f64) -> f64 {
    match side {
        OptionSide::Call => (s - k).max(0.0),
        OptionSide::Put => (k - s).max(0.0),
    }
}

fn d1_d2(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> (f64, f64) {
    let sig_sqrt_t = sigma * t.sqrt();
    let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / sig_sqrt_t;
    (d1, d1 - sig_sqrt_t)
}

/// Black-Scholes premium. Never negative, never NaN.
pub fn price(s: f64, k: f64, t: f64, r: f64, sigma: f64, side: OptionSide) -> f64 {
    if s <= 0.0 || k <= 0.0 {
        return 0.0;
    }
    if t <= 0.0 {
        return intrinsic(side, s, k);
    }
    let sigma = sigma.clamp(MIN_VOL, MAX_VOL);
    let (d1, d2) = d1_d2(s, k, t, r, sigma);
    let df = (-r * t).exp();
    let value = match side {
        OptionSide::Call => s * norm_cdf(d1) - k * df * norm_cdf(d2),
        OptionSide::Put => k * df * norm_cdf(-d2) - s * norm_cdf(-d1),
    };
    value.max(0.0)
}

/// Boundary Greeks at expiry: delta by moneyness, everything else zero.
fn boundary_greeks(side: OptionSide, s: f64, k: f64) -> Greeks {
    let delta = match side {
        OptionSide::Call => {
            if s > k {
                1.0
            } else {
                0.0
            }
        }
        OptionSide::Put => {
            if s < k {
                -1.0
            } else {
                0.0
            }
        }
    };
    Greeks {
        delta,
        ..Greeks::default()
    }
}

/// Full Greeks for one contract
pub fn greeks(s: f64, k: f64, t: f64, r: f64, sigma: f64, side: OptionSide) -> Greeks {
    if s <= 0.0 || k <= 0.0 || t <= 0.0 {
        return boundary_greeks(side, s, k);
    }
    let sigma = sigma.clamp(MIN_VOL, MAX_VOL);
    let (d1, d2) = d1_d2(s, k, t, r, sigma);
    let pdf_d1 = norm_pdf(d1);
    let nd1 = norm_cdf(d1);
    let nd2 = norm_cdf(d2);
    derive_greeks(s, k, t, r, sigma, side, d1_node(d1, d2, nd1, nd2, pdf_d1))
}

/// Per-strike cached quantities for one (spot, expiry, vol) ladder pass
#[derive(Debug, Clone, Copy)]
pub struct LadderNode {
    pub d1: f64,
    pub d2: f64,
    pub nd1: f64,
    pub nd2: f64,
    pub pdf_d1: f64,
}

fn d1_node(d1: f64, d2: f64, nd1: f64, nd2: f64, pdf_d1: f64) -> LadderNode {
    LadderNode {
        d1,
        d2,
        nd1,
        nd2,
        pdf_d1,
    }
}

fn derive_greeks(
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    sigma: f64,
    side: OptionSide,
    node: LadderNode,
) -> Greeks {
    let sqrt_t = t.sqrt();
    let df = (-r * t).exp();
    let gamma = node.pdf_d1 / (s * sigma * sqrt_t);
    let vega = s * node.pdf_d1 * sqrt_t / 100.0;
    let decay = -(s * node.pdf_d1 * sigma) / (2.0 * sqrt_t);
    let (delta, theta_annual) = match side {
        OptionSide::Call => (node.nd1, decay - r * k * df * node.nd2),
        OptionSide::Put => (node.nd1 - 1.0, decay + r * k * df * (1.0 - node.nd2)),
    };
    Greeks {
        delta,
        gamma,
        theta: theta_annual / 365.0,
        vega,
    }
}

/// Implied volatility via Newton-Raphson.
///
/// Guess 0.30, bounded to [0.001, 5.0], at most 100 iterations, tolerance
/// 1e-4 on price. Falls back to the last iterate when vega collapses and
/// stalls convergence.
pub fn implied_volatility(
    market_price: f64,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    side: OptionSide,
) -> f64 {
    if market_price <= 0.0 || s <= 0.0 || k <= 0.0 || t <= 0.0 {
        return MIN_VOL;
    }
    let mut sigma = IV_INITIAL_GUESS;
    for _ in 0..IV_MAX_ITERATIONS {
        let model = price(s, k, t, r, sigma, side);
        let diff = model - market_price;
        if diff.abs() < IV_TOLERANCE {
            return sigma;
        }
        let (d1, _) = d1_d2(s, k, t, r, sigma);
        let raw_vega = s * norm_pdf(d1) * t.sqrt();
        if raw_vega.abs() < 1e-10 {
            break;
        }
        sigma = (sigma - diff / raw_vega).clamp(MIN_VOL, MAX_VOL);
    }
    sigma
}

/// Solve for the underlying price S* at which the contract is worth
/// `target_premium`, by bisection around the current spot.
///
/// Call premiums are monotone increasing in spot and put premiums monotone
/// decreasing, so the root is bracketed by widening around `current_s`.
/// Returns the nearest bracket edge when the target is unreachable inside
/// it (degenerate but defined, never NaN).
pub fn solve_underlying_for_premium(
    target_premium: f64,
    k: f64,
    t: f64,
    r: f64,
    sigma: f64,
    side: OptionSide,
    current_s: f64,
) -> f64 {
    if current_s <= 0.0 || target_premium <= 0.0 {
        return current_s.max(0.0);
    }
    let mut lo = current_s * 0.2;
    let mut hi = current_s * 3.0;
    let f = |s: f64| price(s, k, t, r, sigma, side) - target_premium;

    // Target outside the bracket: return the edge rather than diverging.
    let (f_lo, f_hi) = (f(lo), f(hi));
    match side {
        OptionSide::Call => {
            if f_lo > 0.0 {
                return lo;
            }
            if f_hi < 0.0 {
                return hi;
            }
        }
        OptionSide::Put => {
            if f_lo < 0.0 {
                return lo;
            }
            if f_hi > 0.0 {
                return hi;
            }
        }
    }

    let mut mid = current_s;
    for _ in 0..IV_MAX_ITERATIONS {
        mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid.abs() < IV_TOLERANCE {
            return mid;
        }
        let below_root = match side {
            OptionSide::Call => f_mid < 0.0,
            OptionSide::Put => f_mid > 0.0,
        };
        if below_root {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    mid
}

/// Strike-indexed cache for one (symbol, expiry) scan pass.
///
/// d1/d2/N(d1)/N(d2)/phi(d1) depend only on strike once spot, time and vol
/// are fixed, so they are computed once across the strike ladder and both
/// sides' price and Greeks are derived from the cached node. Scoped per
/// caller (one scanner symbol pass or one sweep evaluation), never shared.
#[derive(Debug, Clone)]
pub struct StrikeLadder {
    spot: f64,
    t: f64,
    r: f64,
    sigma: f64,
    nodes: HashMap<i64, LadderNode>,
}

impl StrikeLadder {
    /// Strike key in tenths of a cent, to make f64 strikes hashable
    fn key(strike: f64) -> i64 {
        (strike * 1000.0).round() as i64
    }

    /// Precompute nodes for every strike in the ladder.
    pub fn build(spot: f64, t: f64, r: f64, sigma: f64, strikes: &[f64]) -> Self {
        let sigma = sigma.clamp(MIN_VOL, MAX_VOL);
        let mut nodes = HashMap::with_capacity(strikes.len());
        if spot > 0.0 && t > 0.0 {
            for &k in strikes {
                if k <= 0.0 {
                    continue;
                }
                nodes.entry(Self::key(k)).or_insert_with(|| {
                    let (d1, d2) = d1_d2(spot, k, t, r, sigma);
                    d1_node(d1, d2, norm_cdf(d1), norm_cdf(d2), norm_pdf(d1))
                });
            }
        }
        StrikeLadder {
            spot,
            t,
            r,
            sigma,
            nodes,
        }
    }

    /// Greeks for one cached strike. `None` when the strike is not in the
    /// ladder (caller passed a strike it never registered).
    pub fn greeks(&self, strike: f64, side: OptionSide) -> Option<Greeks> {
        if self.t <= 0.0 {
            return Some(boundary_greeks(side, self.spot, strike));
        }
        let node = self.nodes.get(&Self::key(strike))?;
        Some(derive_greeks(
            self.spot, strike, self.t, self.r, self.sigma, side, *node,
        ))
    }

    /// Model premium for one cached strike
    pub fn price(&self, strike: f64, side: OptionSide) -> Option<f64> {
        if self.t <= 0.0 {
            return Some(intrinsic(side, self.spot, strike));
        }
        let node = self.nodes.get(&Self::key(strike))?;
        let df = (-self.r * self.t).exp();
        let value = match side {
            OptionSide::Call => self.spot * node.nd1 - strike * df * node.nd2,
            OptionSide::Put => strike * df * (1.0 - node.nd2) - self.spot * (1.0 - node.nd1),
        };
        Some(value.max(0.0))
    }
}
