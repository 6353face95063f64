//! Running a descriptor over whole arrays.

use super::{KernelBuffer, KernelDescriptor, KernelRequest, OperandMeta};
use crate::array::Array;
use crate::diagnostic::{Diagnostic, ErrorCode};

/// Instantiate `desc` into a fresh buffer and apply it to `args`.
pub fn apply(desc: &KernelDescriptor, args: &[&Array]) -> Result<Array, Diagnostic> {
    let mut kb = KernelBuffer::new();
    apply_with(desc, args, &mut kb)
}

/// Like [`apply`], appending the kernel to `kb`. The buffer's parallel
/// threshold decides which loops run on the rayon pool.
pub fn apply_with(desc: &KernelDescriptor, args: &[&Array], kb: &mut KernelBuffer) -> Result<Array, Diagnostic> {
    let sig = desc.signature();
    if args.len() != sig.arity() {
        return Err(Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("{} takes {} operands, got {}", sig, sig.arity(), args.len()),
        ));
    }
    for (i, (arg, param)) in args.iter().zip(&sig.params).enumerate() {
        if arg.ty() != param {
            return Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("operand {} is `{}`, kernel expects `{}`", i, arg.ty(), param),
            ));
        }
    }

    // arrays are packed, so every operand is contiguous
    let metas = vec![OperandMeta::contiguous(); args.len()];
    let refs: Vec<Option<&OperandMeta>> = metas.iter().map(Some).collect();
    let root = kb.len();
    desc.instantiate(kb, root, None, &refs, KernelRequest::Single)?;

    let mut out = Array::zeroed(sig.ret.clone())?;
    let srcs: Vec<&[u8]> = args.iter().map(|a| a.bytes()).collect();
    kb.kernel(root)?.call(out.bytes_mut()?, &srcs)?;
    Ok(out)
}
