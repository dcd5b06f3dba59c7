//! Main entry point for the ota-pack CLI tool

use clap::Parser;
use ota_pack::cli::{Args, run_cli};

/// Exit code for every failure
const EXIT_FAILURE: i32 = 2;

fn main() {
    let args = Args::parse();
    args.init_logger();

    if let Err(e) = run_cli(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(EXIT_FAILURE);
    }
}
