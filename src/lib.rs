// 0DTE Options Signal Engine
// Scans a large option universe for short-dated trade candidates and
// watches the tape for institutional sweep prints.

pub mod config;
pub mod market;
pub mod pricing;
pub mod scanner;
pub mod scorer;
pub mod signals;
pub mod sweep;
pub mod time_window;
pub mod types;
pub mod volatility;

pub use config::Config;
pub use scanner::ScanEngine;
pub use sweep::SweepDetector;
pub use types::{Candidate, OptionQuote, OptionSide, ScanOutcome, ScoreComponents, SweepAlert};
