use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for the given verbosity; `RUST_LOG` takes precedence.
fn default_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Initialize logging. Verbose mode lowers the default level to `debug` so every
/// routed request and backend attempt is visible.
pub fn init_tracing(verbose: bool, json_format: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(verbose))
            .wrap_err("Invalid default log level")?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .wrap_err("Failed to install JSON subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact())
            .try_init()
            .wrap_err("Failed to install console subscriber")?;
    }

    tracing::debug!("fpgate logging initialized (verbose: {}, json: {})", verbose, json_format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_follows_verbosity() {
        assert_eq!(default_filter(true), "debug");
        assert_eq!(default_filter(false), "info");
    }

    #[test]
    fn test_second_init_reports_error() {
        // The first call may already have happened in another test thread.
        let _ = init_tracing(false, false);
        assert!(init_tracing(true, true).is_err());
    }
}
