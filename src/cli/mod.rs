pub mod infer;
pub mod map;
pub mod promote;
pub mod reduce;
pub mod signatures;

use std::path::{Path, PathBuf};
use std::process;

use strata::{Array, BuildReport, Config, Diagnostic, KernelDescriptor, Type};

/// Load `--config`, or the nearest strata.toml above the working directory.
/// Falls back to defaults when neither exists.
pub fn load_config(explicit: Option<&Path>) -> Config {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => std::env::current_dir().ok().and_then(|cwd| Config::find(&cwd)),
    };
    let Some(path) = path else {
        return Config::default();
    };
    match Config::load(&path) {
        Ok(config) => {
            for warning in &config.warnings {
                eprintln!("warning: {}: {}", path.display(), warning.message);
            }
            config
        }
        Err(e) => exit_with(&e),
    }
}

/// Literal text from the command line, or from a file when prefixed with `@`.
pub struct Literal {
    pub name: String,
    pub source: String,
}

pub fn read_literal(input: &str) -> Literal {
    if let Some(path) = input.strip_prefix('@') {
        let path = PathBuf::from(path);
        match std::fs::read_to_string(&path) {
            Ok(source) => Literal {
                name: path.display().to_string(),
                source,
            },
            Err(e) => {
                eprintln!("error: cannot read '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
    } else {
        Literal {
            name: "<literal>".to_string(),
            source: input.to_string(),
        }
    }
}

/// Parse and build an array from the literal, or render diagnostics and exit.
pub fn build_or_exit(literal: &Literal, config: &Config) -> (Array, BuildReport) {
    match strata::infer_literal(&literal.source, &config.infer) {
        Ok(built) => built,
        Err(diags) => {
            strata::diagnostic::render_diagnostics(&diags, &literal.name, &literal.source);
            process::exit(1);
        }
    }
}

pub fn parse_type_or_exit(text: &str) -> Type {
    match strata::syntax::parse_type(text) {
        Ok(ty) => ty,
        Err(diags) => {
            strata::diagnostic::render_diagnostics(&diags, "<type>", text);
            process::exit(1);
        }
    }
}

pub fn exit_with(diag: &Diagnostic) -> ! {
    eprintln!("error: {}", diag);
    if let Some(help) = &diag.help {
        eprintln!("  help: {}", help);
    }
    process::exit(1);
}

pub fn or_exit<T>(result: Result<T, Diagnostic>) -> T {
    result.unwrap_or_else(|e| exit_with(&e))
}

/// Print the descriptor's structure and fingerprint.
pub fn describe(desc: &KernelDescriptor) {
    eprintln!("kernel: {}", desc);
    eprintln!("fingerprint: {}", desc.short_fingerprint());
}

/// Print the array's type and value on stdout.
pub fn print_array(array: &Array) {
    println!("type:  {}", array.ty());
    match array.to_value() {
        Ok(value) => println!("value: {}", value),
        Err(e) => exit_with(&e),
    }
}
