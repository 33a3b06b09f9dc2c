use tracing_subscriber::{Layer, filter::LevelFilter, layer::SubscriberExt, prelude::*};

use crate::settings::{TracingFormat, TracingSettings};

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logs(tracing_settings: &TracingSettings) -> Result<(), anyhow::Error> {
    // If tracing is disabled, there is nothing to initialize
    if !tracing_settings.enabled {
        return Ok(());
    }

    let stdout_layer: Box<dyn Layer<_> + Sync + Send + 'static> = match tracing_settings.format {
        TracingFormat::Default => tracing_subscriber::fmt::layer()
            .with_filter(env_filter())
            .boxed(),
        TracingFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(env_filter())
            .boxed(),
    };

    let registry = tracing_subscriber::registry().with(vec![stdout_layer]);
    registry.try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracing_is_a_no_op() {
        let settings = TracingSettings {
            enabled: false,
            format: TracingFormat::Json,
        };
        init_logs(&settings).unwrap();
        init_logs(&settings).unwrap();
    }
}
