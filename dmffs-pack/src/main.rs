//! `make_dmffs` — packs a host directory into a dmffs image file.
//!
//! Usage: `make_dmffs <input_directory> <output_file>`. Exits 0 on success
//! and 1 if packing fails for any reason, logging the cause to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

#[derive(Parser, Debug)]
#[command(name = "make_dmffs", about = "Pack a directory into a dmffs image")]
struct Args {
    /// Directory whose contents become the image.
    input_directory: PathBuf,

    /// Path of the image file to write.
    output_file: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match dmffs_pack::pack(&args.input_directory, &args.output_file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
