//! `guestlink workers`: list configured workers.

use anyhow::Result;
use guestlink_core::Config;

/// One line per worker: id and endpoint, tab separated.
pub fn render(config: &Config) -> String {
    config
        .workers
        .iter()
        .map(|(id, endpoint)| format!("{id}\t{endpoint}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Execute the `workers` subcommand.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn run(config: &Config) -> Result<()> {
    if config.workers.is_empty() {
        eprintln!("No workers configured. Add a \"workers\" map to .guestlink/settings.json.");
        return Ok(());
    }
    println!("{}", render(config));
    Ok(())
}
