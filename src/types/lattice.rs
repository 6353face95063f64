//! The promotion lattice: least common supertypes.

use super::{ScalarKind, Type};
use crate::diagnostic::{Diagnostic, ErrorCode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PromoteOptions {
    /// Let a scalar join an array by promoting into its element type.
    pub allow_broadcast: bool,
}

/// Least common supertype of `a` and `b`.
pub fn promote(a: &Type, b: &Type) -> Result<Type, Diagnostic> {
    promote_with(a, b, PromoteOptions::default())
}

pub fn promote_with(a: &Type, b: &Type, opts: PromoteOptions) -> Result<Type, Diagnostic> {
    use Type::*;

    match (a, b) {
        (Unknown, other) | (other, Unknown) => Ok(other.clone()),
        (Scalar(k1, w1), Scalar(k2, w2)) => {
            promote_scalar(*k1, *w1, *k2, *w2).ok_or_else(|| mismatch(a, b))
        }
        (FixedArray(e1, n), FixedArray(e2, m)) => {
            let elem = promote_elements(a, b, e1, e2, opts)?;
            if n == m {
                Ok(Type::fixed(elem, *n))
            } else {
                Ok(Type::var(elem))
            }
        }
        (FixedArray(e1, _) | VariableArray(e1), FixedArray(e2, _) | VariableArray(e2)) => {
            Ok(Type::var(promote_elements(a, b, e1, e2, opts)?))
        }
        (Struct(f1), Struct(f2)) => {
            let same_names = f1.len() == f2.len()
                && f1.iter().zip(f2).all(|((n1, _), (n2, _))| n1 == n2);
            if !same_names {
                return Err(mismatch(a, b)
                    .with_note("structs promote only when their field names match in order".into()));
            }
            let mut fields = Vec::with_capacity(f1.len());
            for ((name, t1), (_, t2)) in f1.iter().zip(f2) {
                let ty = promote_with(t1, t2, opts)
                    .map_err(|e| e.with_note(format!("in field '{}'", name)))?;
                fields.push((name.clone(), ty));
            }
            Ok(Struct(fields))
        }
        (Scalar(..), FixedArray(elem, n)) | (FixedArray(elem, n), Scalar(..))
            if opts.allow_broadcast =>
        {
            let scalar = if a.is_scalar() { a } else { b };
            Ok(Type::fixed(promote_with(scalar, elem, opts)?, *n))
        }
        (Scalar(..), VariableArray(elem)) | (VariableArray(elem), Scalar(..))
            if opts.allow_broadcast =>
        {
            let scalar = if a.is_scalar() { a } else { b };
            Ok(Type::var(promote_with(scalar, elem, opts)?))
        }
        _ => {
            let mut err = mismatch(a, b);
            if (a.is_scalar() && b.is_array()) || (a.is_array() && b.is_scalar()) {
                err = err.with_help("a scalar and an array only mix when broadcasting is allowed".into());
            }
            Err(err)
        }
    }
}

/// Whether `src` converts to `dst` without widening `dst`.
pub fn can_assign(dst: &Type, src: &Type) -> Result<(), Diagnostic> {
    match promote(dst, src) {
        Ok(joined) if joined == *dst => Ok(()),
        _ => Err(Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("cannot assign `{}` to `{}` without loss", src, dst),
        )),
    }
}

fn promote_elements(
    a: &Type,
    b: &Type,
    e1: &Type,
    e2: &Type,
    opts: PromoteOptions,
) -> Result<Type, Diagnostic> {
    promote_with(e1, e2, opts).map_err(|e| e.with_note(format!("while promoting `{}` and `{}`", a, b)))
}

/// Join of two scalars as a product of (kind, component width).
fn promote_scalar(k1: ScalarKind, w1: u32, k2: ScalarKind, w2: u32) -> Option<Type> {
    if k1 == ScalarKind::String || k2 == ScalarKind::String {
        return (k1 == k2).then(Type::string);
    }
    let kind = k1.max(k2);
    let component = component_width(k1, w1)
        .max(component_width(k2, w2))
        .max(min_component_width(kind));
    let width = match kind {
        ScalarKind::Complex => component * 2,
        ScalarKind::Bool => 8,
        _ => component,
    };
    Some(Type::Scalar(kind, width))
}

fn component_width(kind: ScalarKind, width: u32) -> u32 {
    match kind {
        ScalarKind::Complex => width / 2,
        _ => width,
    }
}

fn min_component_width(kind: ScalarKind) -> u32 {
    match kind {
        ScalarKind::Float | ScalarKind::Complex => 32,
        _ => 8,
    }
}

fn mismatch(a: &Type, b: &Type) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::TypeMismatch,
        format!("no common type for `{}` and `{}`", a, b),
    )
}
