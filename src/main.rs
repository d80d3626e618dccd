use anyhow::{Context, Result};
use clap::Parser;
use coastline::{analyzer, cli::Cli};
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    if !args.threshold.is_finite() || args.threshold < 0.0 {
        anyhow::bail!(
            "Invalid value for --threshold: {} (must be a non-negative number)",
            args.threshold
        );
    }

    let records = analyzer::analyse(&args.file, args.threshold)
        .with_context(|| format!("Failed to open trace log {}", args.file.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut matched = 0usize;
    for record in records {
        let record =
            record.with_context(|| format!("Failed to read trace log {}", args.file.display()))?;
        writeln!(out, "{}", record)?;
        matched += 1;
    }

    tracing::debug!(matched, threshold_ms = args.threshold, "analysis complete");
    Ok(())
}
