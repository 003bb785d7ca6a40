//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Incremental, multi-phase build engine for package-structured source
/// trees.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug-level logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single build
    ///
    /// Computes the minimal set of builder invocations needed to bring all
    /// generated outputs up to date, then persists the dependency graph so
    /// the next build only reruns what changed.
    Build(BuildArgs),

    /// Build, then rebuild on every source change
    ///
    /// Watches the package tree and reruns an incremental build whenever a
    /// source file is created, modified, or removed.
    Watch(WatchArgs),

    /// Delete all build state
    ///
    /// Removes the engine cache directory (`.kiln/`), including the asset
    /// graph and all hidden outputs. Outputs written into the source tree
    /// are left alone.
    Clean,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Treat files already occupying expected output paths as absent and
    /// overwrite them
    #[arg(long)]
    pub delete_conflicting_outputs: bool,

    /// Serialize work further on constrained machines; outputs are
    /// identical
    #[arg(long)]
    pub low_resources_mode: bool,

    /// Use kiln.<NAME>.config.json for the root package
    #[arg(long, value_name = "NAME")]
    pub config: Option<String>,

    /// Only produce outputs matching PATTERN ([$$][<package>|]<glob>);
    /// repeatable. To-source outputs are always produced.
    #[arg(long = "build-filter", value_name = "PATTERN")]
    pub build_filter: Vec<String>,

    /// Materialize the merged source + output tree into DIR after a
    /// successful build
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    /// Quiet period between a change and the rebuild, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 250)]
    pub debounce: u64,
}
