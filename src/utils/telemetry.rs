//! Telemetry
//!
//! Centralized tracing setup: env-filtered stdout plus a daily-rotated
//! log file. The returned guard must stay alive for the file writer to
//! flush.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub struct TelemetryGuard {
    _log_guard: WorkerGuard,
}

pub fn init_telemetry(service_name: &str) -> TelemetryGuard {
    // Rotates daily so long-lived agents don't fill the disk.
    let file_appender = tracing_appender::rolling::daily("logs", format!("{}.log", service_name));
    let (non_blocking, log_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", service_name)));

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    TelemetryGuard {
        _log_guard: log_guard,
    }
}
