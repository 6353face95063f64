use clap::Args;

use strata::types::{promote_with, PromoteOptions};

use super::{or_exit, parse_type_or_exit};

#[derive(Args)]
pub struct PromoteArgs {
    /// First type, e.g. `3 * int32`
    pub a: String,
    /// Second type
    pub b: String,
    /// Let a scalar join an array's element type
    #[arg(long)]
    pub broadcast: bool,
}

pub fn cmd_promote(args: PromoteArgs) {
    let a = parse_type_or_exit(&args.a);
    let b = parse_type_or_exit(&args.b);
    let opts = PromoteOptions {
        allow_broadcast: args.broadcast,
    };
    println!("{}", or_exit(promote_with(&a, &b, opts)));
}
