use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use slotkeep_engine::{Location, Resolution};

#[derive(Parser)]
#[command(
    name = "slotkeep",
    about = "Slotkeep: versioned save slots with local and cloud storage",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Schema version of the saves this tool writes and reads
    #[arg(long, global = true, default_value = "1")]
    pub schema_version: u32,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Save a JSON snapshot into a slot
    Save(SaveArgs),
    /// Load a slot and print it as JSON
    Load(LoadArgs),
    /// List known slots
    List(ListArgs),
    /// Delete a slot
    Delete(DeleteArgs),
    /// Show the container header of a slot or save file
    Inspect(InspectArgs),
    /// Reconcile the local and cloud copies of a slot
    Sync(SyncArgs),
    /// Delete conflict archives
    Purge(PurgeArgs),
}

#[derive(Args)]
pub struct SaveArgs {
    pub slot: String,
    /// JSON file with the snapshot; stdin when omitted
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,
    #[arg(short, long)]
    pub description: Option<String>,
    #[arg(short, long, default_value = "local")]
    pub location: Location,
}

#[derive(Args)]
pub struct LoadArgs {
    pub slot: String,
    #[arg(short, long, default_value = "both")]
    pub location: Location,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only slots present at this location
    #[arg(short, long)]
    pub location: Option<Location>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub slot: String,
    #[arg(short, long, default_value = "both")]
    pub location: Location,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Slot name in the local root, or a path to a container file
    pub target: String,
}

#[derive(Args)]
pub struct SyncArgs {
    pub slot: String,
    /// Decision to apply if the sync escalates a conflict
    #[arg(short, long, value_name = "keep-local|keep-remote|keep-both")]
    pub keep: Option<Resolution>,
}

#[derive(Args)]
pub struct PurgeArgs {
    /// Only archives of this slot
    pub slot: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_decision_and_location() {
        let cli = Cli::try_parse_from(["slotkeep", "--format", "json", "sync", "Profile1", "--keep", "keep-both"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Sync(args) => assert_eq!(args.keep, Some(Resolution::KeepBoth)),
            _ => panic!("expected sync"),
        }

        let cli = Cli::try_parse_from(["slotkeep", "save", "Profile1", "-l", "cloud"]).unwrap();
        match cli.command {
            Command::Save(args) => assert_eq!(args.location, Location::Cloud),
            _ => panic!("expected save"),
        }
        assert!(Cli::try_parse_from(["slotkeep", "load", "Profile1", "-l", "moon"]).is_err());
    }
}
