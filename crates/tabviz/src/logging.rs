use std::env;

use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `verbose` forces debug output for the
/// workspace crates; otherwise `RUST_LOG` decides, falling back to `info`.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info,tabviz=debug,tabviz_core=debug,tabviz_cache=debug,tabviz_llm=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
    if verbose {
        tracing::debug!("verbose logging enabled");
    }
}

pub fn env_flag() -> bool {
    env::var("TABVIZ_VERBOSE")
        .map(|value| parse_bool(&value))
        .unwrap_or(false)
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
