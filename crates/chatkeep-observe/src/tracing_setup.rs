//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use chatkeep_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! // Hold the guard for the lifetime of the process.
//! let _guard = init_tracing(TracingOptions::default()).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel_stdout: bool,
    /// Filter directives used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            json: false,
            otel_stdout: false,
            default_filter: "info".to_string(),
        }
    }
}

/// Keeps the tracing pipeline alive.
///
/// Dropping the guard flushes pending spans and shuts down the OpenTelemetry
/// tracer provider, if one was installed.
#[must_use = "dropping the guard shuts down trace export"]
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    /// Whether OpenTelemetry export is active.
    pub fn otel_enabled(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Warning: OTel tracer provider shutdown error: {e}");
            }
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// - Always installs a `fmt` layer (text or JSON) with target visibility and
///   span close timing.
/// - Respects `RUST_LOG`, falling back to `options.default_filter`.
/// - With `otel_stdout`, additionally exports spans to stdout via
///   OpenTelemetry.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set or the
/// filter directives are invalid.
pub fn init_tracing(
    options: TracingOptions,
) -> Result<TracingGuard, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.default_filter)?,
    };

    let fmt_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    };

    let provider = options.otel_stdout.then(|| {
        SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build()
    });
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("chatkeep"))
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .with(env_filter)
        .try_init()?;

    if let Some(provider) = &provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    Ok(TracingGuard { provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = TracingOptions::default();
        assert!(!options.json);
        assert!(!options.otel_stdout);
        assert_eq!(options.default_filter, "info");
    }

    #[test]
    fn test_guard_without_provider_drops_cleanly() {
        let guard = TracingGuard { provider: None };
        assert!(!guard.otel_enabled());
        drop(guard);
    }

    // The global subscriber can be set once per process, so both the
    // successful and the rejected call live in one test.
    #[test]
    fn test_init_tracing_once() {
        let guard = init_tracing(TracingOptions {
            otel_stdout: true,
            default_filter: "chatkeep=debug".to_string(),
            ..TracingOptions::default()
        })
        .unwrap();
        assert!(guard.otel_enabled());

        tracing::info_span!("test_span").in_scope(|| tracing::info!("inside span"));

        assert!(init_tracing(TracingOptions::default()).is_err());
        drop(guard);
    }
}
