use anyhow::Context;
use tracing::metadata::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{LogFormat, TelemetrySection};

/// Overrides `[telemetry].filter` when set.
pub const LOG_ENV: &str = "TILE_BRIDGE_LOG";

fn build_filter(config: &TelemetrySection) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    if std::env::var_os(LOG_ENV).is_some() {
        builder.with_env_var(LOG_ENV).from_env_lossy()
    } else {
        builder.parse_lossy(&config.filter)
    }
}

fn build_stderr_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        ),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &TelemetrySection) -> anyhow::Result<()> {
    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![build_stderr_layer(config.format), Box::new(build_filter(config))];
    Registry::default()
        .with(layers)
        .try_init()
        .context("install tracing subscriber")
}
