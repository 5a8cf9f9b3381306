//! The load-generation engine (spec §4.6): drives a journey under
//! concurrent load through a pool of worker tasks, captures per-invocation
//! latency samples, periodically summarizes them into a [`TimeSeries`], and
//! exposes percentile/throughput/error-rate statistics plus declarative
//! pass/fail [`LoadAssertions`].
//!
//! Grounded on the teacher's worker-pool pattern (`planner`'s tokio-task
//! fan-out) generalized from a fixed DAG of steps to a repeatedly-invoked
//! journey, and on `runner::JourneyRunner` for the per-invocation unit of
//! work. Each worker owns its own runner instance (spec §5: "each worker
//! owns its own runner instance, its own HTTP client, and its own
//! ExecutionContext") — `RunnerFactory` exists so a caller can hand the
//! engine a closure that builds exactly that.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::{ErrorContext, VenomError, VenomResult};
use crate::model::Journey;
use crate::runner::JourneyRunner;

/// Load-shape knobs (spec §4.6 "Configuration"). `requests_per_second = 0.0`
/// means unlimited — workers pace themselves with think-time instead.
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub duration: Duration,
    pub concurrent_users: u32,
    pub ramp_up: Duration,
    pub ramp_down: Duration,
    pub requests_per_second: f64,
    pub pattern: LoadPattern,
    pub timeout_per_request: Option<Duration>,
    pub sample_interval: Duration,
    pub think_time_min: Duration,
    pub think_time_max: Duration,
    pub warmup: Duration,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            concurrent_users: 1,
            ramp_up: Duration::ZERO,
            ramp_down: Duration::ZERO,
            requests_per_second: 0.0,
            pattern: LoadPattern::Constant,
            timeout_per_request: None,
            sample_interval: Duration::from_secs(1),
            think_time_min: Duration::ZERO,
            think_time_max: Duration::ZERO,
            warmup: Duration::ZERO,
        }
    }
}

impl LoadTestConfig {
    /// Rejects non-positive durations, `think_max < think_min`, and
    /// `concurrent_users < 1` (spec §4.6 "Validation").
    pub fn validate(&self) -> VenomResult<()> {
        if self.duration.is_zero() {
            return Err(VenomError::ConfigValidation {
                message: "duration must be positive".to_string(),
                context: ErrorContext::new(),
            });
        }
        if self.concurrent_users < 1 {
            return Err(VenomError::ConfigValidation {
                message: "concurrent_users must be at least 1".to_string(),
                context: ErrorContext::new(),
            });
        }
        if self.think_time_max < self.think_time_min {
            return Err(VenomError::ConfigValidation {
                message: "think_time_max is less than think_time_min".to_string(),
                context: ErrorContext::new(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    Constant,
    RampUp,
    Spike,
    Stress,
}

/// One recorded journey invocation (spec §4.6 "Workers").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration_ms: f64,
    pub success: bool,
    pub journey_name: String,
    pub error: Option<String>,
}

/// Periodic summary captured by the monitor task (spec §4.6 "Ramp-up").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub elapsed_seconds: f64,
    pub active_workers: u32,
    pub requests_per_second: f64,
    pub success_count: u32,
    pub error_count: u32,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Latency percentiles computed over the full post-warmup sample set
/// (spec §4.6 "Percentiles").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Linear-interpolated percentile over a sorted sample array: `k = (n-1) *
/// p/100`, `f = floor(k)`, result = `arr[f] + (k-f) * (arr[f+1] - arr[f])`
/// (spec §4.6 "Percentiles"). `sorted` must already be non-decreasing.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let k = (sorted.len() - 1) as f64 * p / 100.0;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;
    if f == c {
        sorted[f]
    } else {
        sorted[f] + (k - f as f64) * (sorted[c] - sorted[f])
    }
}

fn percentiles_of(sorted: &[f64]) -> Percentiles {
    Percentiles {
        p50: percentile(sorted, 50.0),
        p75: percentile(sorted, 75.0),
        p90: percentile(sorted, 90.0),
        p95: percentile(sorted, 95.0),
        p99: percentile(sorted, 99.0),
    }
}

/// Everything a completed load test produced: every post-warmup sample plus
/// the time-series captured while it ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestResult {
    pub journey_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub samples: Vec<RequestSample>,
    pub time_series: Vec<TimeSeriesPoint>,
}

impl LoadTestResult {
    pub fn total_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn success_count(&self) -> usize {
        self.samples.iter().filter(|s| s.success).count()
    }

    pub fn error_count(&self) -> usize {
        self.samples.iter().filter(|s| !s.success).count()
    }

    pub fn error_rate_pct(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.error_count() as f64 / self.samples.len() as f64 * 100.0
        }
    }

    pub fn success_rate_pct(&self) -> f64 {
        100.0 - self.error_rate_pct()
    }

    /// Samples-per-second over the wall-clock test duration (not the
    /// sum-of-durations) — spec §4.6 "Throughput = total samples / test
    /// duration".
    pub fn throughput_rps(&self) -> f64 {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            0.0
        } else {
            self.samples.len() as f64 / elapsed
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().map(|s| s.duration_ms).sum::<f64>() / self.samples.len() as f64
        }
    }

    fn sorted_durations(&self) -> Vec<f64> {
        let mut durations: Vec<f64> = self.samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        durations
    }

    pub fn percentiles(&self) -> Percentiles {
        percentiles_of(&self.sorted_durations())
    }
}

/// Declarative pass/fail thresholds over a [`LoadTestResult`] (spec §4.6
/// "Assertions").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoadAssertions {
    pub max_p50_ms: Option<f64>,
    pub max_p90_ms: Option<f64>,
    pub max_p95_ms: Option<f64>,
    pub max_p99_ms: Option<f64>,
    pub max_avg_ms: Option<f64>,
    pub max_error_rate_pct: Option<f64>,
    pub min_throughput_rps: Option<f64>,
    pub min_success_rate_pct: Option<f64>,
}

impl LoadAssertions {
    /// Returns `(passed, failure_messages)`; never raises.
    pub fn validate(&self, result: &LoadTestResult) -> (bool, Vec<String>) {
        let mut failures = Vec::new();
        let percentiles = result.percentiles();

        if let Some(max) = self.max_p50_ms {
            if percentiles.p50 > max {
                failures.push(format!("p50 latency {:.1}ms above max {:.1}ms", percentiles.p50, max));
            }
        }
        if let Some(max) = self.max_p90_ms {
            if percentiles.p90 > max {
                failures.push(format!("p90 latency {:.1}ms above max {:.1}ms", percentiles.p90, max));
            }
        }
        if let Some(max) = self.max_p95_ms {
            if percentiles.p95 > max {
                failures.push(format!("p95 latency {:.1}ms above max {:.1}ms", percentiles.p95, max));
            }
        }
        if let Some(max) = self.max_p99_ms {
            if percentiles.p99 > max {
                failures.push(format!("p99 latency {:.1}ms above max {:.1}ms", percentiles.p99, max));
            }
        }
        if let Some(max) = self.max_avg_ms {
            let avg = result.avg_latency_ms();
            if avg > max {
                failures.push(format!("average latency {avg:.1}ms above max {max:.1}ms"));
            }
        }
        if let Some(max) = self.max_error_rate_pct {
            let rate = result.error_rate_pct();
            if rate > max {
                failures.push(format!("error rate {rate:.1}% above max {max:.1}%"));
            }
        }
        if let Some(min) = self.min_throughput_rps {
            let rps = result.throughput_rps();
            if rps < min {
                failures.push(format!("throughput {rps:.1} rps below min {min:.1} rps"));
            }
        }
        if let Some(min) = self.min_success_rate_pct {
            let rate = result.success_rate_pct();
            if rate < min {
                failures.push(format!("success rate {rate:.1}% below min {min:.1}%"));
            }
        }

        (failures.is_empty(), failures)
    }

    /// Like [`Self::validate`] but raises [`VenomError::ConfigValidation`]
    /// carrying every failure message joined together, on any violation.
    pub fn assert_valid(&self, result: &LoadTestResult) -> VenomResult<()> {
        let (passed, failures) = self.validate(result);
        if passed {
            Ok(())
        } else {
            Err(VenomError::ConfigValidation {
                message: failures.join("; "),
                context: ErrorContext::new(),
            })
        }
    }
}

/// Builds a fresh, independently-owned [`JourneyRunner`] for one worker
/// (spec §5: "each worker owns its own runner instance"). Implemented as a
/// trait rather than a bare closure type so callers can name concrete
/// factories (e.g. one that also wires a fresh state-manager connection).
pub trait RunnerFactory: Send + Sync {
    fn build(&self) -> JourneyRunner;
}

impl<F> RunnerFactory for F
where
    F: Fn() -> JourneyRunner + Send + Sync,
{
    fn build(&self) -> JourneyRunner {
        self()
    }
}

/// Drives `journey` under the configured concurrency pattern, producing a
/// [`LoadTestResult`]. One [`LoadEngine`] runs exactly one load test.
pub struct LoadEngine {
    config: LoadTestConfig,
    stop_flag: Arc<AtomicBool>,
}

impl LoadEngine {
    pub fn new(config: LoadTestConfig) -> VenomResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Signals every worker and the monitor to stop at their next
    /// iteration boundary. Idempotent; safe to call from any thread (spec
    /// §5 "Load engine `stop()` is idempotent and may be called from any
    /// thread").
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub async fn run(&self, journey: Arc<Journey>, factory: Arc<dyn RunnerFactory>) -> LoadTestResult {
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let samples: Arc<Mutex<Vec<RequestSample>>> = Arc::new(Mutex::new(Vec::new()));
        let active_workers = Arc::new(AtomicU32::new(0));

        let test_end = start + self.config.duration;

        let worker_handles = match self.config.pattern {
            LoadPattern::Stress => {
                self.spawn_stress_workers(&journey, &factory, &samples, &active_workers, test_end)
            }
            _ => self.spawn_fixed_workers(&journey, &factory, &samples, &active_workers, test_end),
        };

        let time_series = self.monitor(start, samples.clone(), active_workers.clone()).await;

        for handle in worker_handles {
            let _ = handle.await;
        }

        let finished_at = chrono::Utc::now();
        let samples = samples.lock().await.clone();

        LoadTestResult {
            journey_name: journey.name.clone(),
            started_at,
            finished_at,
            samples,
            time_series,
        }
    }

    /// Per-worker start delay for every pattern except [`LoadPattern::Stress`]
    /// (spec §4.6b): `constant` starts every worker immediately, `ramp_up`
    /// staggers worker starts across the ramp-up window, `spike` holds every
    /// worker until the run's midpoint and then releases them all at once.
    fn worker_start_delay(&self, worker_index: u32) -> Duration {
        match self.config.pattern {
            LoadPattern::Constant => Duration::ZERO,
            LoadPattern::RampUp => {
                let stagger = if self.config.concurrent_users > 0 {
                    self.config.ramp_up.as_secs_f64() / self.config.concurrent_users as f64
                } else {
                    0.0
                };
                Duration::from_secs_f64(stagger * worker_index as f64)
            }
            LoadPattern::Spike => self.config.duration / 2,
            LoadPattern::Stress => Duration::ZERO,
        }
    }

    fn spawn_fixed_workers(
        &self,
        journey: &Arc<Journey>,
        factory: &Arc<dyn RunnerFactory>,
        samples: &Arc<Mutex<Vec<RequestSample>>>,
        active_workers: &Arc<AtomicU32>,
        test_end: Instant,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.concurrent_users)
            .map(|worker_index| {
                let delay = self.worker_start_delay(worker_index);
                self.spawn_worker(journey.clone(), factory.clone(), samples.clone(), active_workers.clone(), delay, test_end)
            })
            .collect()
    }

    /// `stress` (spec §4.6b): starts with `concurrent_users` workers, then
    /// doubles the running worker count every `ramp_up / 4` until the test
    /// duration elapses, modeling an escalating load probe. Spawned as a
    /// single controller task so its own batch-spawn loop can run
    /// concurrently with the already-running workers and with `monitor`.
    fn spawn_stress_workers(
        &self,
        journey: &Arc<Journey>,
        factory: &Arc<dyn RunnerFactory>,
        samples: &Arc<Mutex<Vec<RequestSample>>>,
        active_workers: &Arc<AtomicU32>,
        test_end: Instant,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let journey = journey.clone();
        let factory = factory.clone();
        let samples = samples.clone();
        let active_workers = active_workers.clone();
        let stop_flag = self.stop_flag.clone();
        let config = self.config.clone();

        let step_interval = {
            let quarter = config.ramp_up.as_secs_f64() / 4.0;
            Duration::from_secs_f64(if quarter > 0.0 { quarter } else { config.duration.as_secs_f64() / 4.0 })
        };

        let controller = tokio::spawn(async move {
            let mut handles = Vec::new();
            let mut batch_count = config.concurrent_users;
            let start = Instant::now();

            loop {
                for _ in 0..batch_count {
                    handles.push(spawn_worker_task(
                        journey.clone(),
                        factory.clone(),
                        samples.clone(),
                        active_workers.clone(),
                        stop_flag.clone(),
                        config.clone(),
                        Duration::ZERO,
                        test_end,
                    ));
                }

                if start.elapsed() >= config.duration || stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(step_interval).await;
                if start.elapsed() >= config.duration || stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                batch_count = batch_count.saturating_mul(2);
            }

            for handle in handles {
                let _ = handle.await;
            }
        });

        vec![controller]
    }

    fn spawn_worker(
        &self,
        journey: Arc<Journey>,
        factory: Arc<dyn RunnerFactory>,
        samples: Arc<Mutex<Vec<RequestSample>>>,
        active_workers: Arc<AtomicU32>,
        delay: Duration,
        test_end: Instant,
    ) -> tokio::task::JoinHandle<()> {
        spawn_worker_task(journey, factory, samples, active_workers, self.stop_flag.clone(), self.config.clone(), delay, test_end)
    }

    /// Captures a [`TimeSeriesPoint`] every `sample_interval`, over samples
    /// recorded since the previous capture, until the overall test duration
    /// elapses or `stop()` is called. Each tick briefly holds the shared
    /// sample-buffer lock (spec §5 "bounded by O(samples since last
    /// capture)").
    async fn monitor(
        &self,
        start: Instant,
        samples: Arc<Mutex<Vec<RequestSample>>>,
        active_workers: Arc<AtomicU32>,
    ) -> Vec<TimeSeriesPoint> {
        let mut points = Vec::new();
        let mut last_index = 0usize;
        let mut last_tick = Instant::now();

        loop {
            tokio::time::sleep(self.config.sample_interval).await;
            let elapsed = start.elapsed();
            let stopped = self.stop_flag.load(Ordering::SeqCst) || elapsed >= self.config.duration;

            let guard = samples.lock().await;
            let window = &guard[last_index.min(guard.len())..];
            let interval_seconds = last_tick.elapsed().as_secs_f64().max(f64::EPSILON);
            let success_count = window.iter().filter(|s| s.success).count() as u32;
            let error_count = window.iter().filter(|s| !s.success).count() as u32;
            let mut durations: Vec<f64> = window.iter().map(|s| s.duration_ms).collect();
            durations.sort_by(|a, b| a.partial_cmp(b).unwrap());

            points.push(TimeSeriesPoint {
                elapsed_seconds: elapsed.as_secs_f64(),
                active_workers: active_workers.load(Ordering::SeqCst),
                requests_per_second: window.len() as f64 / interval_seconds,
                success_count,
                error_count,
                p50_ms: percentile(&durations, 50.0),
                p95_ms: percentile(&durations, 95.0),
                p99_ms: percentile(&durations, 99.0),
            });

            last_index = guard.len();
            drop(guard);
            last_tick = Instant::now();

            if stopped {
                break;
            }
        }

        points
    }
}

/// One worker's execute-measure-record-pace cycle (spec §4.6 "Workers"),
/// shared by the fixed-count and stress spawn paths. Runs until the test's
/// absolute end instant (`test_end`, anchored on the overall run's start —
/// not this worker's own post-delay start, so a delayed worker, e.g. under
/// the `spike` pattern, still stops when the run as a whole ends rather
/// than running for a full `config.duration` of its own) or `stop_flag` is
/// set, pacing itself by `requests_per_second` if configured, otherwise by
/// a think-time sleep.
fn spawn_worker_task(
    journey: Arc<Journey>,
    factory: Arc<dyn RunnerFactory>,
    samples: Arc<Mutex<Vec<RequestSample>>>,
    active_workers: Arc<AtomicU32>,
    stop_flag: Arc<AtomicBool>,
    config: LoadTestConfig,
    delay: Duration,
    test_end: Instant,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        active_workers.fetch_add(1, Ordering::SeqCst);
        let runner = factory.build();
        let worker_start = Instant::now();

        while Instant::now() < test_end && !stop_flag.load(Ordering::SeqCst) {
            let invocation_start = Instant::now();
            let result = runner.execute(&journey).await.into_inner();
            let duration_ms = invocation_start.elapsed().as_secs_f64() * 1000.0;

            if worker_start.elapsed() >= config.warmup {
                let error = result.issues.iter().max_by_key(|i| i.severity).map(|i| i.error.clone());
                samples.lock().await.push(RequestSample {
                    timestamp: chrono::Utc::now(),
                    duration_ms,
                    success: result.success,
                    journey_name: result.journey_name,
                    error,
                });
            }

            if stop_flag.load(Ordering::SeqCst) || Instant::now() >= test_end {
                break;
            }

            if config.requests_per_second > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(1.0 / config.requests_per_second)).await;
            } else if config.think_time_max > Duration::ZERO {
                let think = if config.think_time_max > config.think_time_min {
                    let min = config.think_time_min.as_secs_f64();
                    let max = config.think_time_max.as_secs_f64();
                    Duration::from_secs_f64(rand::thread_rng().gen_range(min..max))
                } else {
                    config.think_time_min
                };
                tokio::time::sleep(think).await;
            }
        }

        active_workers.fetch_sub(1, Ordering::SeqCst);
    })
}
