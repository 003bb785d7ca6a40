//! Logging setup for the CLI.
//!
//! The engine crates only emit `tracing` events; this installs the global
//! subscriber. Precedence: `--verbose`, then `RUST_LOG`, then info level
//! for the kiln crates.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Call once, before any logging.
pub fn init_logger(verbose: bool, no_color: bool) {
    let filter = if verbose {
        EnvFilter::new("kiln_core=debug,kiln_graph=debug,kiln_asset=debug,kiln_cli=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kiln_core=info,kiln_cli=info"))
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_construct() {
        // The subscriber is global and can only be installed once per
        // process, so only the filter expressions are checked here.
        let _ = EnvFilter::new("kiln_core=debug,kiln_cli=debug");
        let _ = EnvFilter::new("kiln_core=info");
    }
}
