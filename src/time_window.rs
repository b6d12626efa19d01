//! Expiry targeting from wall-clock time.
//!
//! Before the Eastern-time cutoff the engine trades same-day expiry with a
//! late-afternoon exit; at or after the cutoff it rolls to the next
//! calendar day with a mid-morning exit. Time-to-expiry is measured to the
//! exit time, not the closing bell, and floored so the pricing kernel
//! never sees a zero or negative input.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::config::WindowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryMode {
    SameDay,
    NextDay,
}

impl std::fmt::Display for ExpiryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryMode::SameDay => f.write_str("same-day"),
            ExpiryMode::NextDay => f.write_str("next-day"),
        }
    }
}

/// Active expiry target for a scan cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryWindow {
    pub mode: ExpiryMode,
    pub expiry_date: NaiveDate,
    /// Hours-until-exit / (24 x 365), floored at the configured minimum
    pub time_to_expiry_years: f64,
    pub exit_time: DateTime<Utc>,
    /// Calendar days between now (ET) and the expiry date
    pub days_to_expiry: i64,
}

/// Derive the active expiry target from the current wall clock.
pub fn determine_target_expiry(now: DateTime<Utc>, config: &WindowConfig) -> ExpiryWindow {
    let now_et = now.with_timezone(&New_York);
    let today = now_et.date_naive();

    let (mode, expiry_date, exit_hm) = if now_et.hour() < config.cutoff_hour {
        (ExpiryMode::SameDay, today, config.same_day_exit)
    } else {
        (
            ExpiryMode::NextDay,
            today + Duration::days(1),
            config.next_day_exit,
        )
    };

    let exit_naive = expiry_date
        .and_hms_opt(exit_hm.0, exit_hm.1, 0)
        .unwrap_or_else(|| expiry_date.and_hms_opt(12, 0, 0).expect("noon is valid"));
    // earliest() resolves the rare DST fold; these exit times never land
    // inside the spring-forward gap, but degrade to now+1h if they ever do
    let exit_time = New_York
        .from_local_datetime(&exit_naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(1));

    let hours_to_exit = (exit_time - now).num_minutes() as f64 / 60.0;
    let time_to_expiry_years = (hours_to_exit / (24.0 * 365.0)).max(config.min_tte_years);

    ExpiryWindow {
        mode,
        expiry_date,
        time_to_expiry_years,
        exit_time,
        days_to_expiry: (expiry_date - today).num_days(),
    }
}

/// Time-to-expiry for an arbitrary expiry date (sweep path), measured to
/// the 16:00 ET close on that date, floored like the scan window.
pub fn time_to_expiry_for(expiry: NaiveDate, now: DateTime<Utc>, config: &WindowConfig) -> f64 {
    let close_naive = expiry.and_hms_opt(16, 0, 0).expect("close is valid");
    let close = New_York
        .from_local_datetime(&close_naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(1));
    let hours = (close - now).num_minutes() as f64 / 60.0;
    (hours / (24.0 * 365.0)).max(config.min_tte_years)
}

/// Calendar days from now (ET) to `expiry`
pub fn days_to_expiry_for(expiry: NaiveDate, now: DateTime<Utc>) -> i64 {
    (expiry - now.with_timezone(&New_York).date_naive()).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cfg() -> WindowConfig {
        Config::default().window
    }

    // 2025-03-03 is a Monday; ET is UTC-5 (standard time).
    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, h, m, 0).unwrap()
    }

    #[test]
    fn test_morning_targets_same_day() {
        // 10:00 ET
        let window = determine_target_expiry(utc(15, 0), &cfg());
        assert_eq!(window.mode, ExpiryMode::SameDay);
        assert_eq!(
            window.expiry_date,
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
        );
        assert_eq!(window.days_to_expiry, 0);
        // exit 15:45 ET = 20:45 UTC, 5.75 hours out
        let expected = 5.75 / (24.0 * 365.0);
        assert!((window.time_to_expiry_years - expected).abs() < 1e-6);
    }

    #[test]
    fn test_afternoon_rolls_to_next_day() {
        // 14:30 ET, past the 14:00 cutoff
        let window = determine_target_expiry(utc(19, 30), &cfg());
        assert_eq!(window.mode, ExpiryMode::NextDay);
        assert_eq!(
            window.expiry_date,
            NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()
        );
        assert_eq!(window.days_to_expiry, 1);
        assert!(window.exit_time > utc(19, 30));
    }

    #[test]
    fn test_cutoff_boundary_is_next_day() {
        // exactly 14:00 ET
        let window = determine_target_expiry(utc(19, 0), &cfg());
        assert_eq!(window.mode, ExpiryMode::NextDay);
    }

    #[test]
    fn test_tte_floor_near_exit() {
        // 13:59 ET, one minute inside the same-day cutoff
        let window = determine_target_expiry(utc(18, 59), &cfg());
        assert_eq!(window.mode, ExpiryMode::SameDay);
        assert!(window.time_to_expiry_years >= cfg().min_tte_years);
    }

    #[test]
    fn test_tte_never_negative_for_past_expiry() {
        let past = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let tte = time_to_expiry_for(past, utc(15, 0), &cfg());
        assert_eq!(tte, cfg().min_tte_years);
    }

    #[test]
    fn test_time_to_expiry_for_future_date() {
        let friday = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let tte = time_to_expiry_for(friday, utc(15, 0), &cfg());
        // ~4 days out
        assert!(tte > 3.5 / 365.0 && tte < 4.5 / 365.0);
        assert_eq!(days_to_expiry_for(friday, utc(15, 0)), 4);
    }
}
