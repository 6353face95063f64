use clap::Args;

use strata::foreign::enumerate_signatures;
use strata::Registry;

use super::or_exit;

#[derive(Args)]
pub struct SignaturesArgs {
    /// Function name; lists the registered functions when omitted
    pub function: Option<String>,
}

pub fn cmd_signatures(args: SignaturesArgs) {
    let registry = Registry::builtin();
    match args.function {
        Some(name) => {
            for sig in or_exit(enumerate_signatures(&registry, &name)) {
                println!("{}", sig);
            }
        }
        None => {
            for name in registry.functions() {
                println!("{}", name);
            }
        }
    }
}
