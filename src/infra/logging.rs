// ============================================================
// Layer 6 — Logging Setup
// ============================================================
// Installs the global tracing subscriber once per process.
//
//   RUST_LOG set  → used verbatim
//   otherwise     → spectral_relay=info, raised to debug by -v
//                   and to trace by -vv
//
// Output goes to stderr, or appends to the --log file (no ANSI
// colour codes in files).

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Default filter directive for a given -v count
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "spectral_relay=info",
        1 => "spectral_relay=debug",
        _ => "spectral_relay=trace",
    }
}

pub fn init(log: Option<&Path>, verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .context("Invalid log filter")?;

    let (writer, ansi) = match log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file '{}'", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| anyhow!("Cannot install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_raises_level() {
        assert_eq!(default_directive(0), "spectral_relay=info");
        assert_eq!(default_directive(1), "spectral_relay=debug");
        assert_eq!(default_directive(5), "spectral_relay=trace");
    }
}
