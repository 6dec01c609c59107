//! Console tracing setup.
//!
//! `RUST_LOG` overrides the default filter, e.g.
//! `RUST_LOG=derivatives_backtest=debug` to see per-day aggregation and
//! batch progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! use derivatives_backtest::observability::init_tracing;
//!
//! fn main() {
//!     init_tracing("info");
//!     // ... run backtests
//! }
//! ```

use tracing_subscriber::EnvFilter;

/// Install a console `fmt` subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset or invalid. Returns
/// `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
