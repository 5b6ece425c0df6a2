//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use scout_core::config::LoggingConfig;

/// Filter directives from config, e.g. `"info,scout_agent=debug"`.
/// `--verbose` raises the base level to debug.
pub fn filter_directives(config: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config
            .and_then(|l| l.level.as_deref())
            .unwrap_or("info")
    };

    let mut directives = level.to_string();
    for filter in config.map(|l| l.filters.as_slice()).unwrap_or_default() {
        directives.push(',');
        directives.push_str(filter);
    }
    directives
}

/// Install the global subscriber. `RUST_LOG` wins over config.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = filter_directives(config, verbose);
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let writer = match config.map(|l| l.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    match config.map(|l| l.format.as_str()) {
        Some("json") => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .init(),
    }
}
