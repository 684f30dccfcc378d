//! CLI argument parsing for ddsprobe

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ddsprobe")]
#[command(version)]
#[command(about = "DDS publish/subscribe call analysis for instrumented processes", long_about = None)]
pub struct Cli {
    /// Print debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which routines of a symbol list (`nm -C` output) would be instrumented
    Scan {
        /// Symbol list file
        #[arg(short, long, value_name = "FILE")]
        symbols: PathBuf,
    },

    /// Classify a symbol list, replay recorded calls and print the report
    Replay {
        /// Symbol list file (`nm -C` output)
        #[arg(short, long, value_name = "FILE")]
        symbols: PathBuf,

        /// Call event log (JSON lines)
        #[arg(short, long, value_name = "FILE")]
        events: PathBuf,

        /// Probe configuration (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Image name used for the symbol list (defaults to the file stem)
        #[arg(long, value_name = "NAME")]
        image: Option<String>,

        /// Write the report here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Also print a summary table to stderr
        #[arg(long)]
        summary: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_scan() {
        let cli = Cli::parse_from(["ddsprobe", "scan", "--symbols", "syms.txt"]);
        assert!(!cli.debug);
        match cli.command {
            Command::Scan { symbols } => assert_eq!(symbols, PathBuf::from("syms.txt")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::parse_from([
            "ddsprobe", "replay", "-s", "syms.txt", "-e", "events.jsonl", "--summary", "--debug",
        ]);
        assert!(cli.debug);
        match cli.command {
            Command::Replay {
                symbols,
                events,
                config,
                image,
                output,
                summary,
            } => {
                assert_eq!(symbols, PathBuf::from("syms.txt"));
                assert_eq!(events, PathBuf::from("events.jsonl"));
                assert!(config.is_none());
                assert!(image.is_none());
                assert!(output.is_none());
                assert!(summary);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_replay_requires_events() {
        assert!(Cli::try_parse_from(["ddsprobe", "replay", "-s", "syms.txt"]).is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["ddsprobe"]).is_err());
    }
}
