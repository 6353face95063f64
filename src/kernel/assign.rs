//! Lowering of type-to-type assignment.

use super::buffer::{DimAccess, FieldStep, KernelBuffer, LoopStep, OperandMeta, Step};
use crate::array::ErrorMode;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{ScalarKind, Type};

/// Emit steps at `at` that write a `dst` value converted from a `src` value.
/// Returns the next free slot.
pub(crate) fn emit_assign(
    kb: &mut KernelBuffer,
    at: usize,
    dst: &Type,
    src: &Type,
    src_meta: Option<&OperandMeta>,
    mode: ErrorMode,
) -> Result<usize, Diagnostic> {
    if dst.metadata_size() > 0 {
        return Err(Diagnostic::error(
            ErrorCode::MetadataMismatch,
            format!("cannot assign into `{}`: kernels do not allocate out-of-line storage", dst),
        ));
    }
    if src.metadata_size() > 0 && src_meta.is_none() {
        return Err(missing_meta(src));
    }
    if dst == src {
        return Ok(kb.put(at, Step::Copy { size: dst.data_size() }));
    }

    match (dst, src) {
        (Type::Scalar(dk, dw), Type::Scalar(sk, sw)) => {
            if *dk == ScalarKind::String || *sk == ScalarKind::String {
                return Err(no_conversion(dst, src));
            }
            Ok(kb.put(
                at,
                Step::Convert {
                    dst: (*dk, *dw),
                    src: (*sk, *sw),
                    mode,
                },
            ))
        }
        (Type::FixedArray(dst_elem, n), _) => {
            let (access, src_elem, peeled) = match src {
                Type::FixedArray(src_elem, m) if m == n => {
                    let stride = src_meta
                        .map(|m| m.stride_or(0, src_elem.data_size() as isize))
                        .unwrap_or(src_elem.data_size() as isize);
                    (DimAccess::Strided(stride), src_elem.as_ref(), 1)
                }
                Type::FixedArray(src_elem, 1) => (DimAccess::Strided(0), src_elem.as_ref(), 1),
                Type::FixedArray(_, m) => {
                    return Err(Diagnostic::error(
                        ErrorCode::ShapeMismatch,
                        format!("cannot assign `{}` to `{}`: {} elements vs {}", src, dst, m, n),
                    ))
                }
                Type::VariableArray(src_elem) => {
                    let stride = src_meta
                        .map(|m| m.stride_or(0, src_elem.data_size() as isize))
                        .unwrap_or(src_elem.data_size() as isize);
                    (DimAccess::Var { stride }, src_elem.as_ref(), 1)
                }
                // broadcast a scalar or record into every element
                _ => (DimAccess::Strided(0), src, 0),
            };
            let elem_size = dst_elem.data_size();
            let next = kb.put(
                at,
                Step::Loop(LoopStep {
                    size: *n,
                    dst_stride: elem_size as isize,
                    srcs: vec![access],
                    elem_size,
                    parallel: *n >= kb.parallel_threshold(),
                }),
            );
            let inner_meta = src_meta.map(|m| m.inner(peeled));
            emit_assign(kb, next, dst_elem, src_elem, inner_meta.as_ref(), mode)
        }
        (Type::Struct(dst_fields), Type::Struct(src_fields)) => {
            if dst_fields.len() != src_fields.len() {
                return Err(no_conversion(dst, src)
                    .with_note("structs must have the same field names".to_string()));
            }
            // reserve the slot, then lay the field kernels out after it
            let mut next = kb.put(at, Step::Vacant);
            let mut fields = Vec::with_capacity(dst_fields.len());
            let mut dst_offset = 0;
            let field_meta = src_meta.map(|_| OperandMeta::contiguous());
            for (name, dst_ty) in dst_fields {
                let Some((src_offset, src_ty)) = src.field(name) else {
                    return Err(no_conversion(dst, src)
                        .with_note(format!("source has no field '{}'", name)));
                };
                fields.push(FieldStep {
                    dst_offset,
                    src_offset,
                    child: next,
                });
                next = emit_assign(kb, next, dst_ty, src_ty, field_meta.as_ref(), mode)?;
                dst_offset += dst_ty.data_size();
            }
            kb.put(at, Step::Fields(fields));
            Ok(next)
        }
        _ => Err(no_conversion(dst, src)),
    }
}

pub(crate) fn missing_meta(ty: &Type) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::MetadataMismatch,
        format!("`{}` needs operand metadata, but none was supplied", ty),
    )
}

fn no_conversion(dst: &Type, src: &Type) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::TypeMismatch,
        format!("no assignment from `{}` to `{}`", src, dst),
    )
}
