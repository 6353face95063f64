use clap::Args;

use strata::kernel::apply_with;
use strata::syntax::parse_value;
use strata::{lift_reduction, Config, KernelDescriptor, ReductionSpec};

use super::map::parse_op;
use super::{build_or_exit, describe, or_exit, print_array, read_literal};

#[derive(Args)]
pub struct ReduceArgs {
    /// Binary primitive to fold with, e.g. add or maximum
    #[arg(long)]
    pub op: String,
    /// Value literal, or @FILE
    pub input: String,
    /// Axis to reduce; repeat for several. All axes when omitted
    #[arg(long, allow_hyphen_values = true)]
    pub axis: Vec<isize>,
    /// Keep reduced axes with size 1
    #[arg(long)]
    pub keepdims: bool,
    /// Seed every slice with this value instead of its first element
    #[arg(long, value_name = "LITERAL")]
    pub identity: Option<String>,
    /// Fold from the last element to the first
    #[arg(long)]
    pub right: bool,
    /// Allow slices to be split across threads
    #[arg(long)]
    pub associative: bool,
    /// Mark the fold commutative
    #[arg(long)]
    pub commutative: bool,
    /// Print the reduction kernel and its fingerprint
    #[arg(long)]
    pub describe: bool,
}

pub fn cmd_reduce(args: ReduceArgs, config: &Config) {
    let op = parse_op(&args.op);
    let literal = read_literal(&args.input);
    let (array, _) = build_or_exit(&literal, config);

    let identity = args.identity.as_deref().map(|text| match parse_value(text) {
        Ok(value) => value,
        Err(diags) => {
            strata::diagnostic::render_diagnostics(&diags, "<identity>", text);
            std::process::exit(1);
        }
    });
    let spec = ReductionSpec {
        axis: (!args.axis.is_empty()).then_some(args.axis),
        keepdims: args.keepdims,
        associative: args.associative,
        commutative: args.commutative,
        right_associative: args.right,
        identity,
    };

    let element = array.ty().innermost().clone();
    let elwise = or_exit(KernelDescriptor::primitive(op, &element));
    let reduction = or_exit(lift_reduction(&elwise, array.ty(), None, &spec));
    if args.describe {
        describe(&reduction);
    }

    let mut kb = config.kernel_buffer();
    let out = or_exit(apply_with(&reduction, &[&array], &mut kb));
    print_array(&out);
}
