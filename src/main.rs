//! CLI front-end for the venomqa execution core.
//!
//! File loading, config merging, and journey authoring are all out of
//! scope for the library (journeys are built in Rust, not parsed from a
//! file format this crate owns) — this binary is a thin external
//! consumer that exercises the library against a single GET request so
//! the crate is runnable end-to-end without bringing your own journey.
//! Anything beyond that (a real journey DSL, historical-run storage,
//! webhook reporters) is left to callers building on top of the library.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use uuid::Uuid;

use async_trait::async_trait;

use venomqa::action::ActionFn;
use venomqa::config::VenomConfig;
use venomqa::context::ExecutionContext;
use venomqa::errors::VenomResult;
use venomqa::http::{HttpCapability, ReqwestHttpClient};
use venomqa::load::{LoadAssertions, LoadEngine, RunnerFactory};
use venomqa::model::{Journey, JourneyItem, Step};
use venomqa::reporter::JsonReporter;
use venomqa::resilience::retry::RetryPolicy;
use venomqa::resilience::ResilientClient;
use venomqa::runner::{JourneyRunner, RunnerConfig};
use venomqa::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "venomqa")]
#[command(about = "VenomQA execution core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parses and validates a resilience-stack/load-test config file.
    Validate {
        /// Path to a YAML file in the §6 config shape.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Runs a single GET request through the retry/circuit-breaker stack
    /// and the journey runner, then prints a JSON report.
    Smoke {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        url: String,
        #[arg(long, default_value = "false")]
        otel: bool,
        #[arg(long)]
        otel_endpoint: Option<String>,
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },

    /// Runs the same GET request under the configured load pattern.
    Load {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        url: String,
        #[arg(long, default_value = "false")]
        otel: bool,
        #[arg(long)]
        otel_endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate { config } => run_validate(config),
        Commands::Smoke { config, url, otel, otel_endpoint, verbose } => {
            setup_telemetry(*otel, otel_endpoint.clone(), *verbose);
            run_smoke(config, url).await;
            shutdown_telemetry();
        }
        Commands::Load { config, url, otel, otel_endpoint } => {
            setup_telemetry(*otel, otel_endpoint.clone(), false);
            run_load(config, url).await;
            shutdown_telemetry();
        }
    }
}

fn setup_telemetry(otel: bool, otel_endpoint: Option<String>, verbose: bool) {
    let mut telemetry_config = TelemetryConfig::from_env();
    telemetry_config.log_level = if verbose { Level::DEBUG } else { Level::INFO };

    if otel {
        telemetry_config.otlp_endpoint =
            otel_endpoint.or(telemetry_config.otlp_endpoint).or_else(|| Some("http://localhost:4317".to_string()));
    }

    if let Err(e) = init_telemetry(telemetry_config) {
        eprintln!("warning: failed to initialize telemetry: {e}");
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

fn load_config(path: &PathBuf) -> Option<VenomConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to read config file");
            return None;
        }
    };

    let config = match VenomConfig::from_yaml(&raw) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to parse config");
            return None;
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, "config failed validation");
        return None;
    }

    Some(config)
}

fn run_validate(path: &PathBuf) {
    match load_config(path) {
        Some(_) => println!("config is valid"),
        None => std::process::exit(1),
    }
}

/// A single `GET url` action, as a concrete [`ActionFn`] rather than a
/// closure adapter — there's exactly one of these and it needs no
/// captured state beyond the URL, so a small struct reads clearer than
/// threading a boxed-future closure through [`venomqa::action::FnAction`].
struct GetAction {
    url: String,
}

#[async_trait]
impl ActionFn for GetAction {
    async fn call(
        &self,
        http: &dyn HttpCapability,
        _ctx: &mut ExecutionContext,
    ) -> VenomResult<Option<serde_json::Value>> {
        let response = http.get(&self.url).await?;
        Ok(Some(serde_json::json!({ "status": response.status })))
    }
}

/// Builds the single-GET smoke journey, threading the HTTP request
/// through the configured retry policy and circuit breaker before
/// returning its status to the step's caller.
fn build_smoke_journey(url: String) -> Journey {
    let action: Arc<dyn ActionFn> = Arc::new(GetAction { url });
    Journey::new("smoke_get", vec![JourneyItem::Step(Step::new("get", action))])
        .expect("single-step journey always satisfies the uniqueness invariants")
}

async fn run_smoke(config_path: &PathBuf, url: &str) {
    let execution_id = Uuid::new_v4().to_string();
    info!(execution_id = %execution_id, "starting smoke run");

    let Some(config) = load_config(config_path) else {
        std::process::exit(1);
    };

    let http: Arc<dyn HttpCapability> = Arc::new(ReqwestHttpClient::new());
    let retry_policy = RetryPolicy::new(config.retry_config());
    let breaker_registry = config.circuit_breaker_registry();
    let breaker = breaker_registry.get("default").await;
    let resilient = ResilientClient::new(retry_policy, breaker);

    let journey = build_smoke_journey(url.to_string());
    let runner = JourneyRunner::new(http.clone(), None, RunnerConfig::default());

    let outcome = resilient
        .execute_async(|| async { Ok(runner.execute(&journey).await.into_inner()) })
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "smoke run aborted by the resilience stack");
            std::process::exit(1);
        }
    };

    let passed = result.success;
    let reporter = JsonReporter::default();
    match reporter.generate(std::slice::from_ref(&result)) {
        Ok(report) => println!("{report}"),
        Err(e) => error!(error = %e, "failed to render report"),
    }

    if !passed {
        std::process::exit(1);
    }
}

struct SmokeRunnerFactory;

impl RunnerFactory for SmokeRunnerFactory {
    /// A fresh `ReqwestHttpClient` per runner (spec §5: "each worker owns
    /// its own runner instance, its own HTTP client"). Sharing one client
    /// across workers would race on its `history` buffer, which
    /// `execute_step` relies on to attribute the right exchange to the
    /// right step.
    fn build(&self) -> JourneyRunner {
        JourneyRunner::new(Arc::new(ReqwestHttpClient::new()), None, RunnerConfig::default())
    }
}

async fn run_load(config_path: &PathBuf, url: &str) {
    let Some(config) = load_config(config_path) else {
        std::process::exit(1);
    };

    let load_config = config.load_test_config();
    let journey = Arc::new(build_smoke_journey(url.to_string()));
    let factory = Arc::new(SmokeRunnerFactory);

    let engine = match LoadEngine::new(load_config) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "invalid load test configuration");
            std::process::exit(1);
        }
    };

    info!("starting load test");
    let result = engine.run(journey, factory).await;

    println!(
        "{} samples, {:.1}% success, {:.1} rps, p50={:.1}ms p95={:.1}ms p99={:.1}ms",
        result.total_samples(),
        result.success_rate_pct(),
        result.throughput_rps(),
        result.percentiles().p50,
        result.percentiles().p95,
        result.percentiles().p99,
    );

    let assertions = LoadAssertions { max_error_rate_pct: Some(5.0), ..Default::default() };
    let (passed, failures) = assertions.validate(&result);
    for failure in &failures {
        error!("{failure}");
    }
    if !passed {
        std::process::exit(1);
    }
}
