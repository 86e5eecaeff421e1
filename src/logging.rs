//! Tracing subscriber setup shared by both binaries.
//!
//! Logs go to stderr; stdout is reserved for the finding mirror and
//! ad-hoc status lines.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Log level from the `-v`/`-q` flags.
pub fn level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Crate targets the `-v`/`-q` level applies to: the library and both
/// binaries.
const TARGETS: &[&str] = &["pgreport", "pgcheck"];

/// One filter directive per crate target at `level`.
pub fn directives(level: Level) -> Vec<Directive> {
    TARGETS
        .iter()
        .filter_map(|target| format!("{}={}", target, level).parse().ok())
        .collect()
}

/// Initializes the tracing subscriber. `RUST_LOG` still applies to
/// other targets.
pub fn init_logging(verbose: u8, quiet: bool) {
    let filter = directives(level(verbose, quiet))
        .into_iter()
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
