//! CLI module for Conductor
//!
//! Provides commands:
//! - `play`: Play a sequence against a mounted plugin
//! - `validate`: Check sequence JSON files
//! - `inspect`: Show mounted plugins and registered sequences
//! - `config`: Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use conductor_core::SequencePriority;
use std::path::PathBuf;

pub mod config;
pub mod inspect;
pub mod play;
pub mod validate;

/// Conductor CLI
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Sequence orchestration host")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file, applied over the defaults
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a sequence and print the result
    Play {
        /// Plugin the sequence is mounted under
        plugin: String,
        /// Sequence id
        sequence: String,
        /// Initial payload as JSON
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
        /// Admission priority
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
        /// Plugin manifest (defaults to the configured or embedded one)
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,
        /// Signals to send once the play is running, as NAME or NAME=JSON
        #[arg(long = "signal", value_name = "SIGNAL")]
        signals: Vec<String>,
        /// Print lifecycle events while playing
        #[arg(long)]
        events: bool,
    },
    /// Validate sequence JSON files
    Validate {
        /// Files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show mounted plugins and registered sequences
    Inspect {
        /// Plugin manifest (defaults to the configured or embedded one)
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Print the embedded defaults instead
        #[arg(long)]
        defaults: bool,
    },
}

/// Admission priority
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
    Chained,
}

impl From<Priority> for SequencePriority {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::High => Self::High,
            Priority::Normal => Self::Normal,
            Priority::Chained => Self::Chained,
        }
    }
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Some(Commands::Play {
            plugin,
            sequence,
            context,
            priority,
            manifest,
            signals,
            events,
        }) => {
            play::run(play::PlayArgs {
                config: config_path,
                plugin: &plugin,
                sequence: &sequence,
                context: context.as_deref(),
                priority: priority.into(),
                manifest: manifest.as_deref(),
                signals: &signals,
                events,
            })
            .await
        }
        Some(Commands::Validate { files }) => validate::run(&files),
        Some(Commands::Inspect { manifest, json }) => {
            inspect::run(config_path, manifest.as_deref(), json)
        }
        Some(Commands::Config { defaults }) => config::run(config_path, defaults),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_play_command() {
        let cli = Cli::try_parse_from([
            "conductor",
            "play",
            "BasicTestPlugin",
            "basic-test-seq",
            "--priority",
            "high",
            "--signal",
            "library:ready",
            "--context",
            r#"{"input":1}"#,
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Play {
                plugin,
                priority,
                signals,
                context,
                ..
            }) => {
                assert_eq!(plugin, "BasicTestPlugin");
                assert_eq!(SequencePriority::from(priority), SequencePriority::High);
                assert_eq!(signals, vec!["library:ready".to_string()]);
                assert_eq!(context.as_deref(), Some(r#"{"input":1}"#));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["conductor", "validate"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["conductor", "inspect", "--config", "local.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("local.toml")));
    }
}
