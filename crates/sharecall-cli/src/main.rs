//! sharecall command-line tool
//!
//! Inspects what the adapter engine does for a signature: the placement under
//! either calling convention, and the move program bridging the two.

mod commands;
mod logging;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::placement::{ConventionArg, PlacementOptions};
use commands::plan::{DirectionArg, PlanOptions};
use logging::LogLevel;
use output::{resolve_color_choice, StyledOutput};

#[derive(Parser)]
#[command(name = "sharecall")]
#[command(about = "Inspect cross-convention call placements and adapter programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Diagnostic log level (SHARECALL_LOG overrides)
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Target description file (TOML, or JSON by extension)
    #[arg(long, global = true)]
    target_file: Option<PathBuf>,

    /// Colored output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and print the adapter program for a signature
    Plan {
        /// Signature file (JSON)
        signature: PathBuf,
        /// Which crossing to build
        #[arg(long, value_enum, default_value = "shared-to-normal")]
        direction: DirectionArg,
        /// Target preset name or description file
        #[arg(long)]
        target: Option<String>,
        /// Resolve the callee through the receiver's method table at this offset
        #[arg(long = "virtual", value_name = "OFFSET", allow_negative_numbers = true, conflicts_with_all = ["delegate", "indirect"])]
        virtual_offset: Option<i32>,
        /// Read the callee from the receiver at this offset
        #[arg(long, value_name = "OFFSET", allow_negative_numbers = true, conflicts_with = "indirect")]
        delegate: Option<i32>,
        /// Take the callee from the generic context
        #[arg(long)]
        indirect: bool,
        /// Print the reverse crossing as well
        #[arg(long)]
        both: bool,
    },

    /// Print where a signature's arguments and return value are placed
    Placement {
        /// Signature file (JSON)
        signature: PathBuf,
        /// Convention to classify under
        #[arg(long, value_enum)]
        convention: ConventionArg,
        /// Target preset name or description file
        #[arg(long)]
        target: Option<String>,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// List target presets
    Targets {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Show build and environment details
    Info,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);
    let mut out = StyledOutput::new(resolve_color_choice(cli.color.as_deref()));
    let target_file = cli.target_file.as_deref();

    match cli.command {
        Commands::Plan {
            signature,
            direction,
            target,
            virtual_offset,
            delegate,
            indirect,
            both,
        } => commands::plan::execute(
            PlanOptions {
                signature: &signature,
                direction,
                target: target.as_deref(),
                target_file,
                virtual_offset,
                delegate_offset: delegate,
                indirect,
                both,
            },
            &mut out,
        ),
        Commands::Placement {
            signature,
            convention,
            target,
            json,
        } => commands::placement::execute(
            PlacementOptions {
                signature: &signature,
                convention,
                target: target.as_deref(),
                target_file,
                json,
            },
            &mut out,
        ),
        Commands::Targets { json } => commands::targets::execute(json, &mut out),
        Commands::Info => commands::info::execute(&mut out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_plan_arguments() {
        let cli = Cli::try_parse_from([
            "sharecall",
            "--target-file",
            "arm.toml",
            "plan",
            "sig.json",
            "--direction",
            "normal-to-shared",
            "--virtual",
            "-8",
        ])
        .unwrap();
        assert_eq!(cli.target_file, Some(PathBuf::from("arm.toml")));
        match cli.command {
            Commands::Plan { direction, virtual_offset, .. } => {
                assert_eq!(direction, DirectionArg::NormalToShared);
                assert_eq!(virtual_offset, Some(-8));
            }
            _ => panic!("expected plan"),
        }
    }

    #[test]
    fn test_placement_requires_convention() {
        assert!(Cli::try_parse_from(["sharecall", "placement", "sig.json"]).is_err());
        assert!(Cli::try_parse_from(["sharecall", "placement", "sig.json", "--convention", "shared"]).is_ok());
    }
}
