//! docshift CLI

use clap::Parser;
use colored::*;

use docshift::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    cli::init_tracing(args.verbose);

    if let Err(e) = cli::run(args).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
