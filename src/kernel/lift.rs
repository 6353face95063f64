//! Lifting a kernel over leading broadcast dimensions.

use std::sync::Arc;

use super::buffer::{DimAccess, KernelBuffer, LoopStep, OperandMeta, Step};
use super::{DescriptorKind, KernelDescriptor, Signature};
use crate::array::layout::contiguous_strides;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{Dim, Type};

/// Lift `child` so it runs once per element of the leading dimensions.
///
/// `types[0]` is the lifted destination and `types[1..]` the lifted sources.
/// Each must end with the child's corresponding operand type. Source
/// dimensions line up with the destination's from the inside out and must
/// be equal, of size 1, missing, or `var` (checked when called).
pub fn lift(child: &KernelDescriptor, types: &[Type]) -> Result<KernelDescriptor, Diagnostic> {
    let sig = child.signature();
    let Some((dst, srcs)) = types.split_first() else {
        return Err(operand_count(sig, 0));
    };
    if srcs.len() != sig.arity() {
        return Err(operand_count(sig, types.len()));
    }

    let lead = leading(dst, &sig.ret, "destination")?;
    let all_dims = dst.dims();
    let dst_dims = &all_dims[..lead];
    if dst_dims.contains(&Dim::Var) {
        return Err(Diagnostic::error(
            ErrorCode::ShapeMismatch,
            format!("lifted destination `{}` must have fixed leading dimensions", dst),
        ));
    }

    for (i, (src, param)) in srcs.iter().zip(&sig.params).enumerate() {
        let src_lead = leading(src, param, &format!("operand {}", i))?;
        if src_lead > lead {
            return Err(Diagnostic::error(
                ErrorCode::ShapeMismatch,
                format!(
                    "operand {} `{}` has {} leading dimensions, destination `{}` has {}",
                    i, src, src_lead, dst, lead
                ),
            ));
        }
        let skipped = lead - src_lead;
        for (k, dim) in src.dims()[..src_lead].iter().enumerate() {
            let target = dst_dims[skipped + k];
            let fits = match dim {
                Dim::Var => true,
                Dim::Fixed(1) => true,
                fixed => *fixed == target,
            };
            if !fits {
                return Err(Diagnostic::error(
                    ErrorCode::ShapeMismatch,
                    format!("cannot broadcast dimension {} of operand {} to {}", dim, i, target),
                )
                .with_note(format!("`{}` against `{}`", src, dst)));
            }
        }
    }

    Ok(KernelDescriptor::from_parts(
        Signature::new(srcs.to_vec(), dst.clone()),
        child.proto(),
        child.needs_exclusive(),
        DescriptorKind::Lifted(Arc::new(child.clone())),
    ))
}

/// Lift `child` over `src_types`, deriving the destination from the
/// broadcast of their leading dimensions.
pub fn lift_broadcast(child: &KernelDescriptor, src_types: &[Type]) -> Result<KernelDescriptor, Diagnostic> {
    let sig = child.signature();
    if src_types.len() != sig.arity() {
        return Err(operand_count(sig, src_types.len() + 1));
    }
    let mut shapes = Vec::with_capacity(src_types.len());
    for (i, (src, param)) in src_types.iter().zip(&sig.params).enumerate() {
        let lead = leading(src, param, &format!("operand {}", i))?;
        shapes.push(src.dims()[..lead].to_vec());
    }
    let dims = broadcast_dims(&shapes)?;
    let mut types = Vec::with_capacity(src_types.len() + 1);
    types.push(Type::with_dims(&dims, sig.ret.clone()));
    types.extend_from_slice(src_types);
    lift(child, &types)
}

fn broadcast_dims(shapes: &[Vec<Dim>]) -> Result<Vec<Dim>, Diagnostic> {
    let ndim = shapes.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(ndim);
    for k in 0..ndim {
        // k counts from the outermost lifted dimension
        let mut size: Option<usize> = None;
        let mut saw_var = false;
        for shape in shapes {
            let Some(pos) = (k + shape.len()).checked_sub(ndim) else {
                continue;
            };
            match shape[pos] {
                Dim::Var => saw_var = true,
                Dim::Fixed(1) => {
                    size.get_or_insert(1);
                }
                Dim::Fixed(n) => match size {
                    Some(m) if m != 1 && m != n => {
                        return Err(Diagnostic::error(
                            ErrorCode::ShapeMismatch,
                            format!("dimensions {} and {} do not broadcast", m, n),
                        ))
                    }
                    _ => size = Some(n),
                },
            }
        }
        match size {
            Some(n) if !(saw_var && n == 1) => out.push(Dim::Fixed(n)),
            _ => {
                return Err(Diagnostic::error(
                    ErrorCode::ShapeMismatch,
                    "a `var` dimension gives no fixed destination size".to_string(),
                )
                .with_help("pass an explicit destination type to `lift`".to_string()))
            }
        }
    }
    Ok(out)
}

/// Number of leading dimensions `ty` adds around `inner`.
fn leading(ty: &Type, inner: &Type, what: &str) -> Result<usize, Diagnostic> {
    ty.ndim()
        .checked_sub(inner.ndim())
        .filter(|&lead| ty.strip_dims(lead) == Some(inner))
        .ok_or_else(|| {
            Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("{} `{}` does not end with `{}`", what, ty, inner),
            )
        })
}

fn operand_count(sig: &Signature, got: usize) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::TypeMismatch,
        format!(
            "lifting {} needs {} types (destination first), got {}",
            sig,
            sig.arity() + 1,
            got
        ),
    )
}

/// One loop per destination leading dimension, then the child.
pub(crate) fn emit(
    lifted: &KernelDescriptor,
    child: &KernelDescriptor,
    kb: &mut KernelBuffer,
    at: usize,
    dst_meta: Option<&OperandMeta>,
    src_meta: &[Option<&OperandMeta>],
) -> Result<usize, Diagnostic> {
    let sig = lifted.signature();
    let child_sig = child.signature();
    let lead = sig.ret.ndim() - child_sig.ret.ndim();
    let dst_dims = sig.ret.dims();
    let dst_contiguous = contiguous_strides(&sig.ret, lead);
    let dst_strides: Vec<isize> = (0..lead)
        .map(|k| dst_meta.map_or(dst_contiguous[k], |m| m.stride_or(k, dst_contiguous[k])))
        .collect();
    // parallel loops stage each element in a packed temporary
    let packed = dst_strides == dst_contiguous;

    struct Operand {
        lead: usize,
        dims: Vec<Dim>,
        strides: Vec<isize>,
    }
    let operands: Vec<Operand> = sig
        .params
        .iter()
        .zip(&child_sig.params)
        .enumerate()
        .map(|(i, (ty, inner))| {
            let lead = ty.ndim() - inner.ndim();
            let contiguous = contiguous_strides(ty, lead);
            let strides = (0..lead)
                .map(|k| match super::meta_at(src_meta, i) {
                    Some(m) => m.stride_or(k, contiguous[k]),
                    None => contiguous[k],
                })
                .collect();
            Operand {
                lead,
                dims: ty.dims(),
                strides,
            }
        })
        .collect();

    let threshold = kb.parallel_threshold();
    let mut next = at;
    for k in 0..lead {
        let Dim::Fixed(size) = dst_dims[k] else {
            return Err(Diagnostic::error(
                ErrorCode::ShapeMismatch,
                format!("lifted destination `{}` must have fixed leading dimensions", sig.ret),
            ));
        };
        let srcs = operands
            .iter()
            .map(|op| {
                let skipped = lead - op.lead;
                if k < skipped {
                    return DimAccess::Strided(0);
                }
                let j = k - skipped;
                match op.dims[j] {
                    Dim::Var => DimAccess::Var { stride: op.strides[j] },
                    Dim::Fixed(1) => DimAccess::Strided(0),
                    Dim::Fixed(_) => DimAccess::Strided(op.strides[j]),
                }
            })
            .collect();
        let elem_size = sig.ret.strip_dims(k + 1).map_or(0, Type::data_size);
        next = kb.put(
            next,
            Step::Loop(LoopStep {
                size,
                dst_stride: dst_strides[k],
                srcs,
                elem_size,
                parallel: packed && !lifted.needs_exclusive() && size >= threshold,
            }),
        );
    }

    let inner_metas: Vec<Option<OperandMeta>> = operands
        .iter()
        .enumerate()
        .map(|(i, op)| super::meta_at(src_meta, i).map(|m| m.inner(op.lead)))
        .collect();
    let inner_refs: Vec<Option<&OperandMeta>> = inner_metas.iter().map(Option::as_ref).collect();
    let inner_dst = dst_meta.map(|m| m.inner(lead));
    child.emit(kb, next, inner_dst.as_ref(), &inner_refs)
}
