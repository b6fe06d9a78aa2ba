// Log subscriber setup. Verbosity is decided once, at startup, and handed to the subscriber;
// components just emit `tracing` events at the level that fits.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flag(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    // default directives, still overridable via RUST_LOG
    pub fn filter_directives(&self) -> &'static str {
        match self {
            Verbosity::Normal => "info,reqwest=warn,hyper=warn",
            Verbosity::Verbose => "debug,rebook_bot=debug,hyper=info,html5ever=info,selectors=info",
        }
    }
}

pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directives()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity == Verbosity::Verbose)
        .with_level(true)
        .init();
}
