//! Parallel backtesting across instruments using Rayon.
//!
//! Each `(strategy, instrument)` backtest is independent: it fetches its own
//! history, generates its own positions and owns its result. Jobs share only
//! the read-only provider, strategy and configuration.
//!
//! # Example
//!
//! ```ignore
//! use derivatives_backtest::backtest::{BacktestConfig, ParallelBacktester};
//! use derivatives_backtest::market::Frequency;
//!
//! let backtester = ParallelBacktester::new(BacktestConfig::default());
//! let batch = backtester.run_liquid(&provider, Frequency::Minute5, &strategy)?;
//! println!("{}/{} succeeded", batch.succeeded, batch.results.len());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, info, span, warn};

use super::config::BacktestConfig;
use super::engine::BacktestResult;
use super::metrics::{Metrics, MetricsReport};
use crate::error::{BacktestError, Result};
use crate::market::{Frequency, MarketDataProvider, Strategy};

// ============================================
// Progress Tracking
// ============================================

/// Completed and failed job counters shared by batch workers.
#[derive(Debug)]
pub struct ProgressTracker {
    total_jobs: u64,
    completed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
}

impl ProgressTracker {
    /// Tracker for `total_jobs` jobs.
    #[must_use]
    pub const fn new(total_jobs: u64) -> Self {
        Self {
            total_jobs,
            completed_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
        }
    }

    /// Record one finished job.
    pub fn job_completed(&self, success: bool) {
        self.completed_jobs.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_jobs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current counts.
    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            total: self.total_jobs,
            completed: self.completed_jobs.load(Ordering::Relaxed),
            failed: self.failed_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Job counts at one point of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Jobs in the batch.
    pub total: u64,
    /// Finished jobs, failed ones included.
    pub completed: u64,
    /// Failed jobs.
    pub failed: u64,
}

impl Progress {
    /// Finished jobs that succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> u64 {
        self.completed - self.failed
    }

    /// Completion percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

// ============================================
// Results
// ============================================

/// Outcome of one instrument backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Metrics, when the job succeeded.
    pub report: Option<MetricsReport>,
    /// Final PnL, when the job succeeded.
    pub pnl: Option<f64>,
    /// Full backtest, when the job succeeded.
    #[serde(skip)]
    pub result: Option<BacktestResult>,
    /// Execution time in milliseconds.
    pub execution_time_ms: u64,
    /// Error message if failed.
    pub error: Option<String>,
    /// Whether the job completed successfully.
    pub success: bool,
}

impl JobResult {
    /// Sharpe ratio from the report, if defined.
    #[must_use]
    pub fn sharpe(&self) -> Option<f64> {
        self.report
            .as_ref()
            .and_then(|r| r.get("sharpe"))
            .filter(|v| v.is_defined())
            .map(|v| v.value)
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Per-instrument results in input order.
    pub results: Vec<JobResult>,
    /// Number of successful jobs.
    pub succeeded: u64,
    /// Number of failed jobs.
    pub failed: u64,
    /// Total execution time in milliseconds.
    pub total_time_ms: u64,
}

impl BatchResult {
    /// Fraction of jobs that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            0.0
        } else {
            self.succeeded as f64 / total as f64
        }
    }

    /// Successful results only.
    #[must_use]
    pub fn successful_results(&self) -> Vec<&JobResult> {
        self.results.iter().filter(|r| r.success).collect()
    }

    /// Failed results only.
    #[must_use]
    pub fn failed_results(&self) -> Vec<&JobResult> {
        self.results.iter().filter(|r| !r.success).collect()
    }

    /// Result with the highest defined Sharpe ratio.
    #[must_use]
    pub fn best_by_sharpe(&self) -> Option<&JobResult> {
        self.results
            .iter()
            .filter_map(|r| r.sharpe().map(|s| (r, s)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(r, _)| r)
    }
}

// ============================================
// Parallel Backtester
// ============================================

/// Runs one strategy over many instruments.
#[derive(Debug, Clone)]
pub struct ParallelBacktester {
    config: BacktestConfig,
}

impl ParallelBacktester {
    /// Create a new parallel backtester.
    #[must_use]
    pub const fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Get effective thread count.
    #[must_use]
    pub fn effective_thread_count(&self) -> usize {
        if self.config.batch.max_threads > 0 {
            self.config.batch.max_threads
        } else {
            rayon::current_num_threads()
        }
    }

    /// Backtest every instrument the provider lists as liquid.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot list instruments, or as
    /// [`ParallelBacktester::run`].
    pub fn run_liquid<P, S>(
        &self,
        provider: &P,
        frequency: Frequency,
        strategy: &S,
    ) -> Result<BatchResult>
    where
        P: MarketDataProvider + ?Sized,
        S: Strategy + ?Sized,
    {
        let instruments: Vec<String> = provider.list_liquid_instruments()?.into_iter().collect();
        self.run(provider, &instruments, frequency, strategy)
    }

    /// Backtest `strategy` on each instrument.
    ///
    /// Failed jobs are recorded in the batch. With
    /// `batch.continue_on_error = false` the error of the failing job earliest
    /// in `instruments` order is returned instead.
    ///
    /// # Errors
    ///
    /// - `InsufficientData` if `instruments` is empty
    /// - `InvalidParameter` if the worker pool cannot be built
    /// - the first job error when `continue_on_error` is off
    #[allow(clippy::cast_possible_truncation)]
    pub fn run<P, S>(
        &self,
        provider: &P,
        instruments: &[String],
        frequency: Frequency,
        strategy: &S,
    ) -> Result<BatchResult>
    where
        P: MarketDataProvider + ?Sized,
        S: Strategy + ?Sized,
    {
        if instruments.is_empty() {
            return Err(BacktestError::InsufficientData(
                "no instruments to backtest".to_string(),
            ));
        }

        let tracker = ProgressTracker::new(instruments.len() as u64);
        let start_time = Instant::now();

        info!(
            jobs = instruments.len(),
            threads = self.effective_thread_count(),
            provider = provider.name(),
            %frequency,
            "Starting batch backtest"
        );

        let results = if instruments.len() >= self.config.batch.min_parallel_jobs {
            self.run_parallel(provider, instruments, frequency, strategy, &tracker)?
        } else {
            instruments
                .iter()
                .map(|id| self.execute_job(provider, id, frequency, strategy, &tracker))
                .collect::<Result<Vec<_>>>()?
        };

        let elapsed = start_time.elapsed();
        let progress = tracker.progress();
        let succeeded = progress.succeeded();

        info!(
            succeeded,
            total = progress.total,
            elapsed_secs = elapsed.as_secs_f64(),
            "Batch backtest complete"
        );

        Ok(BatchResult {
            results,
            succeeded,
            failed: progress.failed,
            total_time_ms: elapsed.as_millis() as u64,
        })
    }

    fn run_parallel<P, S>(
        &self,
        provider: &P,
        instruments: &[String],
        frequency: Frequency,
        strategy: &S,
        tracker: &ProgressTracker,
    ) -> Result<Vec<JobResult>>
    where
        P: MarketDataProvider + ?Sized,
        S: Strategy + ?Sized,
    {
        // Gather every outcome before folding: the error kept is the lowest-index one.
        let run = || {
            instruments
                .par_iter()
                .map(|id| self.execute_job(provider, id, frequency, strategy, tracker))
                .collect::<Vec<_>>()
                .into_iter()
                .collect::<Result<Vec<_>>>()
        };

        if self.config.batch.max_threads == 0 {
            return run();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.batch.max_threads)
            .build()
            .map_err(|e| BacktestError::invalid_parameter("max_threads", e.to_string()))?;
        pool.install(run)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn execute_job<P, S>(
        &self,
        provider: &P,
        instrument_id: &str,
        frequency: Frequency,
        strategy: &S,
        tracker: &ProgressTracker,
    ) -> Result<JobResult>
    where
        P: MarketDataProvider + ?Sized,
        S: Strategy + ?Sized,
    {
        let _span = span!(Level::DEBUG, "backtest_job", instrument = instrument_id).entered();
        let start = Instant::now();

        let outcome = self.backtest_instrument(provider, instrument_id, frequency, strategy);
        tracker.job_completed(outcome.is_ok());

        if self.config.batch.track_progress {
            let progress = tracker.progress();
            debug!(
                completed = progress.completed,
                failed = progress.failed,
                total = progress.total,
                "Batch progress {:.1}%",
                progress.percentage()
            );
        }

        let execution_time_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok((result, report)) => Ok(JobResult {
                instrument_id: instrument_id.to_string(),
                pnl: Some(result.pnl()),
                report: Some(report),
                result: Some(result),
                execution_time_ms,
                error: None,
                success: true,
            }),
            Err(e) if self.config.batch.continue_on_error => {
                warn!(instrument = instrument_id, error = %e, "Backtest job failed");
                Ok(JobResult {
                    instrument_id: instrument_id.to_string(),
                    report: None,
                    pnl: None,
                    result: None,
                    execution_time_ms,
                    error: Some(e.to_string()),
                    success: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn backtest_instrument<P, S>(
        &self,
        provider: &P,
        instrument_id: &str,
        frequency: Frequency,
        strategy: &S,
    ) -> Result<(BacktestResult, MetricsReport)>
    where
        P: MarketDataProvider + ?Sized,
        S: Strategy + ?Sized,
    {
        let prices = provider.get_history(instrument_id, frequency)?;
        if prices.is_empty() {
            warn!(
                instrument = instrument_id,
                provider = provider.name(),
                "Provider returned no bars"
            );
        }
        let positions = strategy.generate_positions(&prices)?;
        let result = BacktestResult::new(&prices, &positions, &self.config)?;
        let report = Metrics::new(&result, &self.config.metrics).report();
        Ok((result, report))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::backtest::config::BatchConfig;
    use crate::error::ProviderError;
    use crate::market::{Bar, InMemoryProvider, PositionSeries, PriceSeries};

    fn provider(ids: &[&str]) -> InMemoryProvider {
        let mut provider = InMemoryProvider::new();
        for (n, id) in ids.iter().enumerate() {
            let bars = (0..10u32)
                .map(|i| {
                    let ts = Utc.with_ymd_and_hms(2024, 3, 1 + i, 2, 0, 0).unwrap();
                    #[allow(clippy::cast_precision_loss)]
                    let close = 1250.0 + f64::from(i) * (n as f64 + 1.0);
                    Bar::flat(ts, close)
                })
                .collect();
            provider.add_series(Frequency::Day1, PriceSeries::new(*id, bars).unwrap());
        }
        provider
    }

    fn always_long(prices: &PriceSeries) -> Result<PositionSeries> {
        PositionSeries::aligned_with(prices, vec![1.0; prices.len()])
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(10);

        tracker.job_completed(true);
        tracker.job_completed(true);
        tracker.job_completed(false);

        let progress = tracker.progress();
        assert_eq!(
            progress,
            Progress {
                total: 10,
                completed: 3,
                failed: 1
            }
        );
        assert_eq!(progress.succeeded(), 2);
        assert!((progress.percentage() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_instruments_error() {
        let backtester = ParallelBacktester::new(BacktestConfig::default());
        let result = backtester.run(&provider(&[]), &[], Frequency::Day1, &always_long);
        assert!(matches!(result, Err(BacktestError::InsufficientData(_))));
    }

    #[test]
    fn test_failed_job_recorded() {
        let backtester = ParallelBacktester::new(BacktestConfig::default());
        let batch = backtester
            .run(
                &provider(&["VN30F1M"]),
                &ids(&["VN30F1M", "VN30F9M"]),
                Frequency::Day1,
                &always_long,
            )
            .unwrap();

        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.results[1].instrument_id, "VN30F9M");
        assert_eq!(
            batch.results[1].error.as_deref(),
            Some("Unknown instrument: VN30F9M")
        );
        assert!((batch.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stop_on_first_error() {
        let config = BacktestConfig {
            batch: BatchConfig {
                continue_on_error: false,
                ..BatchConfig::default()
            },
            ..BacktestConfig::default()
        };
        let backtester = ParallelBacktester::new(config);
        let err = backtester
            .run(
                &provider(&["VN30F1M"]),
                &ids(&["VN30F9M"]),
                Frequency::Day1,
                &always_long,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BacktestError::Provider(ProviderError::UnknownInstrument("VN30F9M".to_string()))
        );
    }

    #[test]
    fn test_parallel_stop_reports_earliest_failure() {
        let config = BacktestConfig {
            batch: BatchConfig {
                max_threads: 4,
                min_parallel_jobs: 1,
                continue_on_error: false,
                ..BatchConfig::default()
            },
            ..BacktestConfig::default()
        };
        let backtester = ParallelBacktester::new(config);
        let names = ["A", "MISSING1", "B", "MISSING2", "MISSING3", "C"];

        for _ in 0..20 {
            let err = backtester
                .run(
                    &provider(&["A", "B", "C"]),
                    &ids(&names),
                    Frequency::Day1,
                    &always_long,
                )
                .unwrap_err();
            assert_eq!(
                err,
                BacktestError::Provider(ProviderError::UnknownInstrument("MISSING1".to_string()))
            );
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let names = ["A", "B", "C", "D", "E", "F"];
        let provider = provider(&names);

        let sequential = ParallelBacktester::new(BacktestConfig {
            batch: BatchConfig {
                min_parallel_jobs: usize::MAX,
                ..BatchConfig::default()
            },
            ..BacktestConfig::default()
        });
        let parallel = ParallelBacktester::new(BacktestConfig {
            batch: BatchConfig {
                max_threads: 2,
                min_parallel_jobs: 1,
                ..BatchConfig::default()
            },
            ..BacktestConfig::default()
        });

        let a = sequential
            .run(&provider, &ids(&names), Frequency::Day1, &always_long)
            .unwrap();
        let b = parallel
            .run(&provider, &ids(&names), Frequency::Day1, &always_long)
            .unwrap();

        let pnl = |batch: &BatchResult| batch.results.iter().map(|r| r.pnl).collect::<Vec<_>>();
        assert_eq!(pnl(&a), pnl(&b));
        assert_eq!(b.succeeded, 6);
        assert!(b.best_by_sharpe().is_some());
    }

    #[test]
    fn test_run_liquid_skips_illiquid() {
        let mut provider = provider(&["VN30F1M", "VN30F2M"]);
        provider.mark_illiquid("VN30F2M");
        let backtester = ParallelBacktester::new(BacktestConfig::default());
        let batch = backtester
            .run_liquid(&provider, Frequency::Day1, &always_long)
            .unwrap();
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].instrument_id, "VN30F1M");
        assert!(batch.results[0].report.is_some());
    }
}
