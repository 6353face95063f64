use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Infer dynamic array types and run deferred kernels over them"
)]
struct Cli {
    /// strata.toml to use instead of searching from the working directory
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Infer the type of a value literal and build an array from it
    Infer(cli::infer::InferArgs),
    /// Print the common type of two datashapes
    Promote(cli::promote::PromoteArgs),
    /// Apply a primitive elementwise, broadcasting over dimensions
    Map(cli::map::MapArgs),
    /// Reduce an array along some or all of its axes
    Reduce(cli::reduce::ReduceArgs),
    /// List the signatures of a builtin foreign function
    Signatures(cli::signatures::SignaturesArgs),
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Infer(args) => cli::infer::cmd_infer(args, &cli::load_config(cli.config.as_deref())),
        Command::Promote(args) => cli::promote::cmd_promote(args),
        Command::Map(args) => cli::map::cmd_map(args, &cli::load_config(cli.config.as_deref())),
        Command::Reduce(args) => cli::reduce::cmd_reduce(args, &cli::load_config(cli.config.as_deref())),
        Command::Signatures(args) => cli::signatures::cmd_signatures(args),
    }
}
