//! Tracing/OpenTelemetry wiring for the ambient observability stack (spec
//! §1a). Grounded on the teacher's `telemetry` module: a `tracing-subscriber`
//! registry with an optional OTLP export layer, configured from either an
//! explicit [`TelemetryConfig`] or the standard `OTEL_*` environment
//! variables. Journeys and load tests log through `tracing` spans/events;
//! this module only owns process-wide subscriber setup, not per-request
//! instrumentation (that lives alongside the HTTP capability and runner).

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Process-wide telemetry settings: service name, optional OTLP collector
/// endpoint, trace sampling ratio, and whether to also log to the console.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Identifies this process in exported traces.
    pub service_name: String,
    /// OTLP/gRPC collector endpoint, e.g. `http://localhost:4317`. `None`
    /// disables OTLP export entirely (console-only logging).
    pub otlp_endpoint: Option<String>,
    /// Fraction of traces sampled, in `[0.0, 1.0]`.
    pub sampling_ratio: f64,
    pub enable_console_logging: bool,
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "venomqa".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Reads `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`, and
    /// `OTEL_TRACES_SAMPLER_ARG` over the defaults, the usual way of
    /// configuring OTLP export without recompiling.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }
        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Installs a global `tracing` subscriber, optionally layered with an OTLP
/// exporter. Returns the `Tracer` handle when OTLP was configured, so a
/// caller can attach it to further spans if needed; returns `None` for
/// console-only setups. Call [`shutdown_telemetry`] before the process
/// exits so buffered spans are flushed.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());
        let subscriber = tracing_subscriber::registry().with(env_filter).with(telemetry_layer);

        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "telemetry initialized with OTLP export"
        );
        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);
        if config.enable_console_logging {
            subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
        } else {
            subscriber.init();
        }
        tracing::info!("telemetry initialized (console only, no OTLP endpoint configured)");
        Ok(None)
    }
}

fn init_otlp_tracer(service_name: &str, endpoint: &str, sampling_ratio: f64) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}

/// Flushes any spans still buffered by the batch exporter. Must run before
/// process exit or they're lost.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("telemetry shut down");
}

/// Per-request span bookkeeping the HTTP capability and runner can use to
/// attach consistent attributes to an HTTP call's span without each call
/// site re-deriving them by hand.
pub mod instrumentation {
    use std::time::Instant;

    #[derive(Debug)]
    pub struct HttpSpanContext {
        pub method: String,
        pub path: String,
        pub start_time: Instant,
        pub status_code: Option<u16>,
        pub duration_ms: Option<u64>,
        pub step_id: String,
        pub step_name: Option<String>,
    }

    impl HttpSpanContext {
        pub fn new(method: &str, path: &str, step_id: &str) -> Self {
            Self {
                method: method.to_string(),
                path: path.to_string(),
                start_time: Instant::now(),
                status_code: None,
                duration_ms: None,
                step_id: step_id.to_string(),
                step_name: None,
            }
        }

        pub fn with_name(mut self, name: &str) -> Self {
            self.step_name = Some(name.to_string());
            self
        }

        pub fn finish(&mut self, status_code: u16) {
            self.status_code = Some(status_code);
            self.duration_ms = Some(self.start_time.elapsed().as_millis() as u64);
        }

        pub fn attributes(&self) -> Vec<(&'static str, String)> {
            let mut attrs = vec![
                ("http.method", self.method.clone()),
                ("http.target", self.path.clone()),
                ("step.id", self.step_id.clone()),
            ];

            if let Some(name) = &self.step_name {
                attrs.push(("step.name", name.clone()));
            }
            if let Some(status) = self.status_code {
                attrs.push(("http.status_code", status.to_string()));
            }
            if let Some(duration) = self.duration_ms {
                attrs.push(("http.duration_ms", duration.to_string()));
            }

            attrs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_console_only() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "venomqa");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.enable_console_logging);
    }

    #[test]
    fn http_span_context_tracks_timing_and_status() {
        use instrumentation::HttpSpanContext;

        let mut ctx = HttpSpanContext::new("GET", "/api/users", "step-1").with_name("list_users");
        assert_eq!(ctx.step_name, Some("list_users".to_string()));
        assert!(ctx.status_code.is_none());

        ctx.finish(200);
        assert_eq!(ctx.status_code, Some(200));
        assert!(ctx.duration_ms.is_some());
    }

    #[test]
    fn attributes_include_method_target_and_status() {
        use instrumentation::HttpSpanContext;

        let mut ctx = HttpSpanContext::new("POST", "/api/orders", "step-2");
        ctx.finish(201);
        let attrs = ctx.attributes();

        assert!(attrs.iter().any(|(k, v)| *k == "http.method" && v == "POST"));
        assert!(attrs.iter().any(|(k, v)| *k == "http.target" && v == "/api/orders"));
        assert!(attrs.iter().any(|(k, v)| *k == "http.status_code" && v == "201"));
    }
}
