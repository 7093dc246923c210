//! Diagnostics output for the service and the CLI.
//!
//! Events go to stderr so that command output on stdout (such as
//! `wherenow recent --format json`) stays machine-readable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary reports, chosen with `-q` / `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Startup, shutdown and patches.
    #[default]
    Normal,
    /// Adds per-request and per-append detail.
    Verbose,
    /// Adds lock acquisition and release.
    Trace,
}

impl Verbosity {
    /// Most detailed level emitted at this verbosity.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// `EnvFilter` directive covering this crate and the HTTP trace layer.
    #[must_use]
    pub fn default_directive(&self) -> String {
        let level = self.to_level_filter();
        format!("wherenow={level},tower_http={level}")
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set and valid, replaces the directive derived from
/// `verbosity`. Later calls are no-ops.
///
/// ```no_run
/// use wherenow::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_keeps_errors_only() {
        assert_eq!(Verbosity::Quiet.to_level_filter(), Level::ERROR);
        assert_eq!(
            Verbosity::Quiet.default_directive(),
            "wherenow=ERROR,tower_http=ERROR"
        );
    }

    #[test]
    fn test_levels_increase_with_verbosity() {
        let levels: Vec<Level> = [
            Verbosity::Quiet,
            Verbosity::Normal,
            Verbosity::Verbose,
            Verbosity::Trace,
        ]
        .iter()
        .map(Verbosity::to_level_filter)
        .collect();
        assert_eq!(
            levels,
            vec![Level::ERROR, Level::INFO, Level::DEBUG, Level::TRACE]
        );
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn test_directive_parses_as_env_filter() {
        for verbosity in [Verbosity::Normal, Verbosity::Trace] {
            assert!(EnvFilter::try_new(verbosity.default_directive()).is_ok());
        }
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging(Verbosity::Verbose);
        init_logging(Verbosity::Quiet);
    }
}
