use clap::Args;

use strata::Config;

use super::{build_or_exit, print_array, read_literal};

#[derive(Args)]
pub struct InferArgs {
    /// Value literal, or @FILE to read one from a file
    pub input: String,
    /// Mark the built array immutable
    #[arg(long)]
    pub freeze: bool,
}

pub fn cmd_infer(args: InferArgs, config: &Config) {
    let literal = read_literal(&args.input);
    let (array, report) = build_or_exit(&literal, config);
    let array = if args.freeze { array.freeze() } else { array };

    print_array(&array);
    println!("access: {}", array.access().name());
    println!(
        "built: {} elements, {} promotions, {} retagged, {} bytes",
        report.elements,
        report.promotions,
        report.retagged,
        array.bytes().len()
    );
}
