//! Packed buffer layout.
//!
//! Values are laid out inline with no padding. Fixed dimensions repeat their
//! element contiguously; struct fields follow each other in declaration
//! order. Ragged dimensions and strings occupy a reference slot pointing at
//! data appended to the same buffer.

use super::scalar::{read_scalar, read_slot, write_scalar, write_slot, ErrorMode};
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{ScalarKind, Type};
use crate::value::Value;

/// Byte strides of the first `count` leading dimensions for a contiguous
/// value of type `ty`. A ragged dimension's stride is the element size
/// inside its out-of-line block.
pub(crate) fn contiguous_strides(ty: &Type, count: usize) -> Vec<isize> {
    let mut strides = Vec::with_capacity(count);
    let mut current = ty;
    for _ in 0..count {
        let Some(elem) = current.element() else {
            break;
        };
        strides.push(elem.data_size() as isize);
        current = elem;
    }
    strides
}

/// Decode the value of type `ty` stored at `at`.
pub(crate) fn read_value(bytes: &[u8], at: usize, ty: &Type) -> Result<Value, Diagnostic> {
    match ty {
        Type::Unknown => Err(Diagnostic::error(
            ErrorCode::UnsupportedValue,
            "cannot read a value of unknown type".to_string(),
        )),
        Type::Scalar(kind, width) => read_scalar(bytes, at, *kind, *width),
        Type::FixedArray(elem, n) => {
            let size = elem.data_size();
            let items = (0..*n)
                .map(|i| read_value(bytes, at + i * size, elem))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(items))
        }
        Type::VariableArray(elem) => {
            let (offset, len) = read_slot(bytes, at)?;
            let size = elem.data_size();
            let items = (0..len)
                .map(|i| read_value(bytes, offset + i * size, elem))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(items))
        }
        Type::Struct(fields) => {
            let mut offset = at;
            let mut out = Vec::with_capacity(fields.len());
            for (name, field_ty) in fields {
                out.push((name.clone(), read_value(bytes, offset, field_ty)?));
                offset += field_ty.data_size();
            }
            Ok(Value::Record(out))
        }
    }
}

/// Encode `value` as `ty` at `at`. `ty` must not need out-of-line storage.
/// A scalar written into an array type is broadcast to every element.
pub(crate) fn write_value(
    bytes: &mut [u8],
    at: usize,
    ty: &Type,
    value: &Value,
    mode: ErrorMode,
) -> Result<(), Diagnostic> {
    match ty {
        Type::Scalar(ScalarKind::String, _) | Type::VariableArray(_) => Err(Diagnostic::error(
            ErrorCode::MetadataMismatch,
            format!("cannot write `{}` without an out-of-line heap", ty),
        )),
        Type::Unknown => Err(Diagnostic::error(
            ErrorCode::UnsupportedValue,
            "cannot write a value of unknown type".to_string(),
        )),
        Type::Scalar(kind, width) => write_scalar(bytes, at, *kind, *width, value, mode),
        Type::FixedArray(elem, n) => {
            let size = elem.data_size();
            for i in 0..*n {
                let item = fixed_item(value, i, *n, ty)?;
                write_value(bytes, at + i * size, elem, item, mode)?;
            }
            Ok(())
        }
        Type::Struct(fields) => {
            let mut offset = at;
            for (name, field_ty) in fields {
                let item = record_field(value, name, ty)?;
                write_value(bytes, offset, field_ty, item, mode)?;
                offset += field_ty.data_size();
            }
            Ok(())
        }
    }
}

/// Like [`write_value`], but appends ragged blocks and string bytes to the
/// end of `bytes`.
pub(crate) fn write_value_alloc(
    bytes: &mut Vec<u8>,
    at: usize,
    ty: &Type,
    value: &Value,
    mode: ErrorMode,
) -> Result<(), Diagnostic> {
    match ty {
        Type::Scalar(ScalarKind::String, _) => match value {
            Value::Str(s) => {
                let offset = bytes.len();
                bytes.extend_from_slice(s.as_bytes());
                write_slot(bytes, at, offset, s.len())
            }
            other => Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("cannot store {} in a `string` slot", other),
            )),
        },
        Type::VariableArray(elem) => {
            let single = std::slice::from_ref(value);
            let items = match value {
                Value::List(items) => items.as_slice(),
                _ => single,
            };
            let size = elem.data_size();
            let offset = bytes.len();
            bytes.resize(offset + items.len() * size, 0);
            write_slot(bytes, at, offset, items.len())?;
            for (i, item) in items.iter().enumerate() {
                write_value_alloc(bytes, offset + i * size, elem, item, mode)?;
            }
            Ok(())
        }
        Type::FixedArray(elem, n) => {
            let size = elem.data_size();
            for i in 0..*n {
                let item = fixed_item(value, i, *n, ty)?;
                write_value_alloc(bytes, at + i * size, elem, item, mode)?;
            }
            Ok(())
        }
        Type::Struct(fields) => {
            let mut offset = at;
            for (name, field_ty) in fields {
                let item = record_field(value, name, ty)?;
                write_value_alloc(bytes, offset, field_ty, item, mode)?;
                offset += field_ty.data_size();
            }
            Ok(())
        }
        Type::Unknown | Type::Scalar(..) => write_value(bytes, at, ty, value, mode),
    }
}

fn fixed_item<'v>(value: &'v Value, i: usize, n: usize, ty: &Type) -> Result<&'v Value, Diagnostic> {
    match value {
        Value::List(items) if items.len() == n => Ok(&items[i]),
        Value::List(items) if items.len() == 1 => Ok(&items[0]),
        Value::List(items) => Err(Diagnostic::error(
            ErrorCode::ShapeMismatch,
            format!("cannot store {} elements in `{}`", items.len(), ty),
        )),
        scalar => Ok(scalar),
    }
}

fn record_field<'v>(value: &'v Value, name: &str, ty: &Type) -> Result<&'v Value, Diagnostic> {
    let Value::Record(fields) = value else {
        return Err(Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("cannot store {} in `{}`", value, ty),
        ));
    };
    fields
        .iter()
        .find(|(field, _)| field == name)
        .map(|(_, v)| v)
        .ok_or_else(|| {
            Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("record is missing field '{}' required by `{}`", name, ty),
            )
        })
}
