use relay_core::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &AppConfig) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        match env_filter.as_str() {
            "debug" => EnvFilter::new("warn,relay_core=debug,relay_cli=debug"),
            "trace" => EnvFilter::new("warn,relay_core=trace,relay_cli=trace"),
            _ => EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn,relay_core=debug,relay_cli=debug")),
        }
    } else {
        let level = &config.logging.level;
        EnvFilter::try_new(format!("warn,relay_core={level},relay_cli={level}"))
            .unwrap_or_else(|_| EnvFilter::new("warn,relay_core=info,relay_cli=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}
