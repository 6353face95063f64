//! Typed byte buffers.

pub(crate) mod layout;
pub(crate) mod scalar;

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

pub use scalar::ErrorMode;

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::Type;
use crate::value::{normalize_index, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    ReadWrite,
    ReadOnly,
    /// Read-only, and guaranteed never to change.
    Immutable,
}

impl Access {
    pub fn parse(name: &str) -> Result<Access, Diagnostic> {
        match name {
            "readwrite" => Ok(Access::ReadWrite),
            "readonly" => Ok(Access::ReadOnly),
            "immutable" => Ok(Access::Immutable),
            _ => Err(Diagnostic::error(
                ErrorCode::InvalidAccessMode,
                format!("invalid access mode '{}'", name),
            )
            .with_help("expected one of: readwrite, readonly, immutable".to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Access::ReadWrite => "readwrite",
            Access::ReadOnly => "readonly",
            Access::Immutable => "immutable",
        }
    }
}

enum Storage {
    Owned(Vec<u8>),
    /// Memory owned elsewhere. Dropping `owner` releases it.
    External {
        ptr: NonNull<u8>,
        len: usize,
        _owner: Arc<dyn Any + Send + Sync>,
    },
}

/// A value of a known [`Type`] in a packed byte buffer.
pub struct Array {
    ty: Type,
    storage: Storage,
    access: Access,
}

// SAFETY: external storage is kept alive by `owner`, and `from_raw` callers
// promise nobody else mutates it while the view exists. Owned storage is a
// plain Vec.
unsafe impl Send for Array {}
unsafe impl Sync for Array {}

impl Array {
    pub(crate) fn from_parts(ty: Type, bytes: Vec<u8>) -> Array {
        Array {
            ty,
            storage: Storage::Owned(bytes),
            access: Access::ReadWrite,
        }
    }

    /// A zero-filled array. The type must be fully inline.
    pub fn zeroed(ty: Type) -> Result<Array, Diagnostic> {
        check_inline(&ty)?;
        let bytes = vec![0u8; ty.data_size()];
        Ok(Array::from_parts(ty, bytes))
    }

    /// Encode a value tree as `ty`, converting scalars with `mode`.
    pub fn from_value(ty: &Type, value: &Value, mode: ErrorMode) -> Result<Array, Diagnostic> {
        if ty.contains_unknown() {
            return Err(Diagnostic::error(
                ErrorCode::UnsupportedValue,
                format!("cannot allocate `{}`: element type is unknown", ty),
            ));
        }
        let mut bytes = vec![0u8; ty.data_size()];
        layout::write_value_alloc(&mut bytes, 0, ty, value, mode)?;
        Ok(Array::from_parts(ty.clone(), bytes))
    }

    /// View memory owned by someone else as an array of `ty`.
    ///
    /// `access` is `"readwrite"`, `"readonly"` or `"immutable"`. Types with
    /// out-of-line parts cannot be described by a bare pointer and are
    /// rejected.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `ty.data_size()` bytes (and writes,
    /// for `readwrite`) for as long as `owner` is alive, and must not be
    /// mutated through other paths while the returned array exists.
    pub unsafe fn from_raw(
        ty: Type,
        ptr: *const u8,
        owner: Arc<dyn Any + Send + Sync>,
        access: &str,
    ) -> Result<Array, Diagnostic> {
        let access = Access::parse(access)?;
        if ty.metadata_size() > 0 {
            return Err(Diagnostic::error(
                ErrorCode::UnsupportedMetadata,
                format!("`{}` needs metadata and cannot be viewed from a raw pointer", ty),
            ));
        }
        check_inline(&ty)?;
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            Diagnostic::error(ErrorCode::UnsupportedValue, "null data pointer".to_string())
        })?;
        let len = ty.data_size();
        Ok(Array {
            ty,
            storage: Storage::External {
                ptr,
                len,
                _owner: owner,
            },
            access,
        })
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Mark the array immutable. There is no way back.
    pub fn freeze(mut self) -> Array {
        self.access = Access::Immutable;
        self
    }

    pub fn data_ptr(&self) -> *const u8 {
        self.bytes().as_ptr()
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes,
            // SAFETY: see `from_raw`.
            Storage::External { ptr, len, .. } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
        }
    }

    pub fn bytes_mut(&mut self) -> Result<&mut [u8], Diagnostic> {
        if !self.is_writable() {
            return Err(Diagnostic::error(
                ErrorCode::ReadOnly,
                format!("array is {}", self.access.name()),
            ));
        }
        match &mut self.storage {
            Storage::Owned(bytes) => Ok(bytes),
            // SAFETY: see `from_raw`; readwrite views were promised writable.
            Storage::External { ptr, len, .. } => unsafe {
                Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), *len))
            },
        }
    }

    /// Length of the outermost dimension.
    pub fn len(&self) -> Result<usize, Diagnostic> {
        match &self.ty {
            Type::FixedArray(_, n) => Ok(*n),
            Type::VariableArray(_) => Ok(scalar::read_slot(self.bytes(), 0)?.1),
            other => Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("`{}` has no dimensions", other),
            )),
        }
    }

    pub fn is_empty(&self) -> Result<bool, Diagnostic> {
        Ok(self.len()? == 0)
    }

    pub fn to_value(&self) -> Result<Value, Diagnostic> {
        layout::read_value(self.bytes(), 0, &self.ty)
    }

    /// Element `index` of the outermost dimension. Negative indices count
    /// from the end.
    pub fn item(&self, index: &Value) -> Result<Value, Diagnostic> {
        let index = normalize_index(index.as_index()?, self.len()?)?;
        let (base, elem) = match &self.ty {
            Type::FixedArray(elem, _) => (0, elem.as_ref()),
            Type::VariableArray(elem) => (scalar::read_slot(self.bytes(), 0)?.0, elem.as_ref()),
            other => {
                return Err(Diagnostic::error(
                    ErrorCode::TypeMismatch,
                    format!("`{}` cannot be indexed", other),
                ))
            }
        };
        layout::read_value(self.bytes(), base + index * elem.data_size(), elem)
    }

    /// Integer value of a scalar array, for use as an index.
    pub fn as_index(&self) -> Result<i64, Diagnostic> {
        if !self.ty.is_scalar() {
            return Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("only scalar arrays can be used as an index, not `{}`", self.ty),
            ));
        }
        self.to_value()?.as_index()
    }

    /// Only scalars have a truth value, even one-element arrays do not.
    pub fn truthiness(&self) -> Result<bool, Diagnostic> {
        match &self.ty {
            ty if ty.is_scalar() => self.to_value()?.truthiness(),
            ty => Err(Diagnostic::error(
                ErrorCode::AmbiguousTruthValue,
                format!("the truth value of `{}` is ambiguous", ty),
            )),
        }
    }
}

fn check_inline(ty: &Type) -> Result<(), Diagnostic> {
    if ty.contains_unknown() {
        return Err(Diagnostic::error(
            ErrorCode::UnsupportedValue,
            format!("cannot allocate `{}`: element type is unknown", ty),
        ));
    }
    if ty.metadata_size() > 0 {
        return Err(Diagnostic::error(
            ErrorCode::MetadataMismatch,
            format!("`{}` has out-of-line parts and cannot be allocated zeroed", ty),
        ));
    }
    Ok(())
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("ty", &self.ty.to_string())
            .field("access", &self.access)
            .field("len", &self.bytes().len())
            .finish()
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_value() {
            Ok(value) => write!(f, "array({}, type=\"{}\")", value, self.ty),
            Err(_) => write!(f, "array(<unreadable>, type=\"{}\")", self.ty),
        }
    }
}
