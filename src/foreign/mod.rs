//! Kernels backed by foreign inner loops.
//!
//! A dispatch table maps function names to typed signatures and, per
//! signature, to an [`InnerLoop`] that computes one element from raw operand
//! bytes. [`Registry`] is the in-memory table; [`Registry::builtin`] carries
//! a few arithmetic loops.


use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytemuck::Pod;

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::kernel::{KernelDescriptor, Signature};
use crate::types::{can_assign, Type};

/// One element of a foreign function: reads each input's bytes and writes
/// the output's.
pub trait InnerLoop: Send + Sync {
    fn call(&self, inputs: &[&[u8]], output: &mut [u8]) -> Result<(), String>;
}

impl<F> InnerLoop for F
where
    F: Fn(&[&[u8]], &mut [u8]) -> Result<(), String> + Send + Sync,
{
    fn call(&self, inputs: &[&[u8]], output: &mut [u8]) -> Result<(), String> {
        self(inputs, output)
    }
}

/// Where foreign functions come from.
pub trait DispatchTable {
    /// Signatures `function` is available for, in lookup order.
    fn signatures(&self, function: &str) -> Result<Vec<Signature>, Diagnostic>;

    fn inner_loop(&self, function: &str, sig: &Signature) -> Option<Arc<dyn InnerLoop>>;
}

#[derive(Default)]
pub struct Registry {
    functions: BTreeMap<String, Vec<(Signature, Arc<dyn InnerLoop>)>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the loop for `function` at `sig`.
    pub fn register(&mut self, function: &str, sig: Signature, inner: Arc<dyn InnerLoop>) {
        let entries = self.functions.entry(function.to_string()).or_default();
        match entries.iter_mut().find(|(s, _)| *s == sig) {
            Some(entry) => entry.1 = inner,
            None => entries.push((sig, inner)),
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// The signature to call `function` with for `arg_types`: an exact
    /// match, else the first one every argument converts to safely.
    pub fn find_matching(&self, function: &str, arg_types: &[Type]) -> Result<Signature, Diagnostic> {
        let sigs = self.signatures(function)?;
        if let Some(sig) = sigs.iter().find(|s| s.params == arg_types) {
            return Ok(sig.clone());
        }
        sigs.iter()
            .find(|s| {
                s.params.len() == arg_types.len()
                    && s.params
                        .iter()
                        .zip(arg_types)
                        .all(|(param, arg)| can_assign(param, arg).is_ok())
            })
            .cloned()
            .ok_or_else(|| {
                let args: Vec<String> = arg_types.iter().map(Type::to_string).collect();
                Diagnostic::error(
                    ErrorCode::TypeMismatch,
                    format!("no signature of `{}` accepts ({})", function, args.join(", ")),
                )
                .with_note(format!("{} signatures registered", sigs.len()))
            })
    }

    /// `add`, `multiply` and `negative` over int32, int64, float32 and
    /// float64.
    pub fn builtin() -> Self {
        let mut reg = Registry::new();
        register_numeric::<i32>(&mut reg, Type::int(32), |a, b| a.wrapping_add(b), |a, b| a.wrapping_mul(b), |a| a.wrapping_neg());
        register_numeric::<i64>(&mut reg, Type::int(64), |a, b| a.wrapping_add(b), |a, b| a.wrapping_mul(b), |a| a.wrapping_neg());
        register_numeric::<f32>(&mut reg, Type::float(32), |a, b| a + b, |a, b| a * b, |a| -a);
        register_numeric::<f64>(&mut reg, Type::float(64), |a, b| a + b, |a, b| a * b, |a| -a);
        reg
    }
}

impl DispatchTable for Registry {
    fn signatures(&self, function: &str) -> Result<Vec<Signature>, Diagnostic> {
        self.functions
            .get(function)
            .map(|entries| entries.iter().map(|(sig, _)| sig.clone()).collect())
            .ok_or_else(|| {
                Diagnostic::error(
                    ErrorCode::ForeignCallFailed,
                    format!("no foreign function named `{}`", function),
                )
            })
    }

    fn inner_loop(&self, function: &str, sig: &Signature) -> Option<Arc<dyn InnerLoop>> {
        self.functions
            .get(function)?
            .iter()
            .find(|(s, _)| s == sig)
            .map(|(_, inner)| Arc::clone(inner))
    }
}

fn register_numeric<T: Pod + Send + Sync>(
    reg: &mut Registry,
    ty: Type,
    add: fn(T, T) -> T,
    mul: fn(T, T) -> T,
    neg: fn(T) -> T,
) {
    let binary = Signature::new(vec![ty.clone(), ty.clone()], ty.clone());
    reg.register("add", binary.clone(), Arc::new(binary_loop(add)));
    reg.register("multiply", binary, Arc::new(binary_loop(mul)));
    reg.register(
        "negative",
        Signature::new(vec![ty.clone()], ty),
        Arc::new(move |inputs: &[&[u8]], output: &mut [u8]| {
            let [a] = inputs else {
                return Err(format!("expected 1 input, got {}", inputs.len()));
            };
            write_pod(output, neg(read_pod(a)?))
        }),
    );
}

fn binary_loop<T: Pod>(op: fn(T, T) -> T) -> impl Fn(&[&[u8]], &mut [u8]) -> Result<(), String> + Send + Sync {
    move |inputs, output| {
        let [a, b] = inputs else {
            return Err(format!("expected 2 inputs, got {}", inputs.len()));
        };
        write_pod(output, op(read_pod(a)?, read_pod(b)?))
    }
}

fn read_pod<T: Pod>(bytes: &[u8]) -> Result<T, String> {
    bytemuck::try_pod_read_unaligned(bytes).map_err(|e| format!("bad input: {:?}", e))
}

fn write_pod<T: Pod>(output: &mut [u8], value: T) -> Result<(), String> {
    let bytes = bytemuck::bytes_of(&value);
    if output.len() != bytes.len() {
        return Err(format!("output holds {} bytes, expected {}", output.len(), bytes.len()));
    }
    output.copy_from_slice(bytes);
    Ok(())
}

/// All signatures `function` is available for in `table`.
pub fn enumerate_signatures(table: &dyn DispatchTable, function: &str) -> Result<Vec<Signature>, Diagnostic> {
    table.signatures(function)
}

/// A deferred kernel calling `function` at `sig`. With `needs_exclusive`,
/// every call holds the process-wide exclusive lock and lifted loops around
/// it stay sequential.
pub fn build_deferred_kernel_from_function(
    table: &dyn DispatchTable,
    function: &str,
    sig: &Signature,
    needs_exclusive: bool,
) -> Result<KernelDescriptor, Diagnostic> {
    let inner = table.inner_loop(function, sig).ok_or_else(|| {
        Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("`{}` has no inner loop for {}", function, sig),
        )
    })?;
    KernelDescriptor::foreign(function, sig.clone(), inner, needs_exclusive)
}

static EXCLUSIVE: Mutex<()> = Mutex::new(());

/// Serializes calls into foreign code that is not thread-safe.
pub(crate) fn exclusive_lock() -> MutexGuard<'static, ()> {
    EXCLUSIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
