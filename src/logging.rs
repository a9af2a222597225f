//! Structured logging initialization.
//!
//! The appliance usually runs under a service manager, so output goes to
//! stderr as compact plain lines unless a terminal is attached.

use std::io::{self, IsTerminal};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter directive for the given verbosity flags.
///
/// `quiet` wins over `verbose`: 0 = info, 1 = debug, 2+ = trace.
pub const fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "micropiscope=error";
    }
    match verbose {
        0 => "micropiscope=info",
        1 => "micropiscope=debug",
        _ => "micropiscope=trace",
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the directive derived from the flags, e.g.
/// `RUST_LOG=micropiscope=debug,v4l=warn`.
pub fn init_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    if io::stderr().is_terminal() {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::NONE)
            .with_writer(io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    } else {
        // Journald adds its own timestamps.
        let fmt_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::NONE)
            .without_time()
            .compact()
            .with_writer(io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}
