//! # kiln-cli
//!
//! Command-line front end for the kiln build engine.
//!
//! The engine runs builders compiled into the invoking binary, so the
//! typical setup is a thin `main` that registers its builders and hands
//! control over:
//!
//! ```no_run
//! use kiln_core::BuilderApplication;
//!
//! fn main() {
//!     let builders: Vec<BuilderApplication> = vec![/* your builders */];
//!     std::process::exit(kiln_cli::main_with_builders(builders, Vec::new()));
//! }
//! ```
//!
//! The stock `kiln` binary ships with no builders; it still scans, keeps
//! the asset graph current, materializes `--output` trees, and cleans.
//!
//! Exit codes: `0` success, `1` build failure, `2` configuration error.

pub mod cli;
mod commands;
pub mod logger;
pub mod watcher;

use clap::Parser;
use kiln_core::{BuilderApplication, PostProcessApplication};

pub use cli::{BuildArgs, Cli, Command, WatchArgs};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_BUILD_FAILURE: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Parse arguments, set up logging, and run the selected command on a
/// current-thread runtime. The working directory must be the root package
/// directory.
pub fn main_with_builders(
    builders: Vec<BuilderApplication>,
    post_process: Vec<PostProcessApplication>,
) -> i32 {
    let cli = Cli::parse();
    logger::init_logger(cli.verbose, cli.no_color);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return EXIT_BUILD_FAILURE;
        }
    };
    runtime.block_on(run(cli, builders, post_process))
}

/// Run one parsed command. Exposed separately so embedders can supply
/// their own argument handling or runtime.
pub async fn run(
    cli: Cli,
    builders: Vec<BuilderApplication>,
    post_process: Vec<PostProcessApplication>,
) -> i32 {
    let root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("cannot determine working directory: {e}");
            return EXIT_BUILD_FAILURE;
        }
    };
    match cli.command {
        Command::Build(args) => commands::build(&root, args, builders, post_process).await,
        Command::Watch(args) => commands::watch(&root, args, builders, post_process).await,
        Command::Clean => commands::clean(&root),
    }
}
