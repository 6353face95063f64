use std::process;

use clap::Args;

use strata::kernel::apply_with;
use strata::{lift_broadcast, Config, KernelDescriptor, PrimitiveOp};

use super::{build_or_exit, describe, or_exit, print_array, read_literal};

#[derive(Args)]
pub struct MapArgs {
    /// Primitive to apply (see `--list`)
    #[arg(long, required_unless_present = "list")]
    pub op: Option<String>,
    /// Value literal, or @FILE
    #[arg(required_unless_present = "list")]
    pub input: Option<String>,
    /// Second operand for binary primitives, broadcast against the first
    #[arg(long, value_name = "LITERAL")]
    pub with: Option<String>,
    /// Print the lifted kernel and its fingerprint
    #[arg(long)]
    pub describe: bool,
    /// List the primitives
    #[arg(long)]
    pub list: bool,
}

pub fn cmd_map(args: MapArgs, config: &Config) {
    if args.list {
        for op in PrimitiveOp::all() {
            println!("{:<12} arity {}", op.name(), op.arity());
        }
        return;
    }
    let (Some(name), Some(input)) = (args.op.as_deref(), args.input.as_deref()) else {
        eprintln!("error: --op and an input literal are required");
        process::exit(1);
    };
    let op = parse_op(name);

    let first = build_or_exit(&read_literal(input), config).0;
    let mut operands = vec![first];
    match (op.arity(), args.with.as_deref()) {
        (1, None) => {}
        (2, Some(other)) => operands.push(build_or_exit(&read_literal(other), config).0),
        (1, Some(_)) => {
            eprintln!("error: '{}' takes one operand; drop --with", op.name());
            process::exit(1);
        }
        _ => {
            eprintln!("error: '{}' takes two operands; pass the second with --with", op.name());
            process::exit(1);
        }
    }

    let element = operands[0].ty().innermost().clone();
    let child = or_exit(KernelDescriptor::primitive(op, &element));
    let types: Vec<_> = operands.iter().map(|a| a.ty().clone()).collect();
    let lifted = or_exit(lift_broadcast(&child, &types));
    if args.describe {
        describe(&lifted);
    }

    let mut kb = config.kernel_buffer();
    let refs: Vec<_> = operands.iter().collect();
    let out = or_exit(apply_with(&lifted, &refs, &mut kb));
    print_array(&out);
}

pub(crate) fn parse_op(name: &str) -> PrimitiveOp {
    match PrimitiveOp::parse(name) {
        Some(op) => op,
        None => {
            let known: Vec<_> = PrimitiveOp::all().iter().map(|op| op.name()).collect();
            eprintln!("error: unknown primitive '{}'", name);
            eprintln!("  help: one of {}", known.join(", "));
            process::exit(1);
        }
    }
}
