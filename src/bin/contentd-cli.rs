use clap::Parser;
use contentd::cli::{self, Command};
use contentd::engine::ContentEngine;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "contentd-cli", about = "Content engine maintenance CLI")]
struct Args {
    /// Directory holding the engine's WAL and config; created if missing.
    #[arg(long, default_value = "./content-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let _ = contentd::logger::init();
    let args = Args::parse();

    let engine = match ContentEngine::open(&args.data_dir) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to open content engine at {:?}: {e}", args.data_dir);
            std::process::exit(1);
        }
    };

    let now = chrono::Utc::now().timestamp();
    match cli::run(&engine, args.command, now) {
        Ok(message) => println!("{message}"),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
