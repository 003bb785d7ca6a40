//! The stock `kiln` binary.
//!
//! Builders are compiled into the invoking binary, so this entry point
//! registers none; embedders write their own `main` and call
//! [`kiln_cli::main_with_builders`] with their builder list.

fn main() {
    std::process::exit(kiln_cli::main_with_builders(Vec::new(), Vec::new()));
}
