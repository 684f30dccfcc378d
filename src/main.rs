use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use ddsprobe::cli::{Cli, Command};
use ddsprobe::config::ProbeConfig;
use ddsprobe::report::{print_summary, Report};
use ddsprobe::rules::RuleTable;
use ddsprobe::{replay, DdsMiddleware};
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

fn read_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}: {}", what, path.display()))
}

fn run_scan(symbols: &Path) -> Result<()> {
    let routines = replay::parse_symbols(&read_file(symbols, "symbol list")?);
    let rules = RuleTable::builtin().context("Failed to load built-in match rules")?;
    let matches = replay::scan(&rules, &routines);

    for m in &matches {
        println!("{:#014x} {:<16} {}", m.address, m.rule, m.signature);
    }
    eprintln!(
        "[ddsprobe: {} of {} routines match {}]",
        matches.len(),
        routines.len(),
        DdsMiddleware::NAME
    );
    Ok(())
}

fn write_report(report: &Report, config: &ProbeConfig, output: Option<&Path>) -> Result<()> {
    let json = if config.report.pretty {
        report.to_json_pretty()
    } else {
        report.to_json()
    }
    .context("Failed to serialize report")?;

    match output {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write report: {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    match args.command {
        Command::Scan { symbols } => run_scan(&symbols),
        Command::Replay {
            symbols,
            events,
            config,
            image,
            output,
            summary,
        } => {
            let config = match config {
                Some(path) => ProbeConfig::from_toml(&path)?,
                None => ProbeConfig::default(),
            };
            let image = image.unwrap_or_else(|| {
                symbols
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "main".to_string())
            });

            let routines = replay::parse_symbols(&read_file(&symbols, "symbol list")?);
            let events = replay::parse_events(&read_file(&events, "event log")?)
                .with_context(|| format!("Failed to parse event log: {}", events.display()))?;

            let report = replay::run_replay(&image, routines, &events, &config)?;
            if summary {
                print_summary(&report);
            }
            write_report(&report, &config, output.as_deref())
        }
    }
}
