//! Tracing initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for the configured level.
///
/// `RUST_LOG` wins when set, so operators can still turn individual
/// targets up or down.
pub fn filter_directive(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        "debug" | "info" | "warn" | "error" | "trace" => level.to_ascii_lowercase(),
        _ => "info".to_string(),
    };

    format!("vidra={level},tower_http=info")
}

/// Initialize the global tracing subscriber.
pub fn init(level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter_directive(level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_uses_configured_level() {
        assert_eq!(filter_directive("debug"), "vidra=debug,tower_http=info");
        assert_eq!(filter_directive("WARN"), "vidra=warn,tower_http=info");
    }

    #[test]
    fn directive_falls_back_to_info() {
        assert_eq!(filter_directive("loud"), "vidra=info,tower_http=info");
    }
}
