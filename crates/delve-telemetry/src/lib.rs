use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format of the stdout layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with span list. For log shipping.
    Json,
    /// Human-readable, for terminals.
    Pretty,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "delve_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Pretty,
        }
    }
}

/// Handle returned by [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryGuard {
    directives: String,
    installed: bool,
}

impl TelemetryGuard {
    /// Filter directives in effect (RUST_LOG if it was set, else the config).
    pub fn directives(&self) -> &str {
        &self.directives
    }

    /// False when another global subscriber was already installed.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Build the filter string from config: `info,delve_engine=debug,...`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let configured = filter_directives(&config);
    let (env_filter, directives) = match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            let directives = filter.to_string();
            (filter, directives)
        }
        Err(_) => (EnvFilter::new(&configured), configured),
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    let installed = match tracing_subscriber::registry().with(fmt_layer).try_init() {
        Ok(()) => true,
        Err(e) => {
            eprintln!("delve-telemetry: subscriber already installed: {e}");
            false
        }
    };

    TelemetryGuard {
        directives,
        installed,
    }
}
