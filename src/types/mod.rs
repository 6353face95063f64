//! Element types and their datashape text form.
//!
//! A [`Type`] describes the shape and representation of a value: scalars,
//! inline fixed-length arrays, ragged (variable-length) arrays stored out of
//! line, and packed structs. Types are immutable and compared structurally.

pub mod lattice;

use std::fmt;

pub use lattice::{can_assign, promote, promote_with, PromoteOptions};

/// Size in bytes of an out-of-line reference slot: `(u64 offset, u64 len)`.
pub const SLOT_SIZE: usize = 16;

/// Scalar kinds, declared in promotion order (String stands apart).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    UInt,
    Int,
    Float,
    Complex,
    String,
}

impl ScalarKind {
    pub fn is_numeric(self) -> bool {
        !matches!(self, ScalarKind::String)
    }
}

/// A leading array dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(usize),
    Var,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Var => f.write_str("var"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// Bottom of the lattice: nothing observed yet.
    Unknown,
    /// Kind and total bit width (complex128 = two float64 components).
    Scalar(ScalarKind, u32),
    FixedArray(Box<Type>, usize),
    VariableArray(Box<Type>),
    Struct(Vec<(String, Type)>),
}

impl Type {
    pub fn bool() -> Type {
        Type::Scalar(ScalarKind::Bool, 8)
    }

    pub fn int(width: u32) -> Type {
        Type::Scalar(ScalarKind::Int, width)
    }

    pub fn uint(width: u32) -> Type {
        Type::Scalar(ScalarKind::UInt, width)
    }

    pub fn float(width: u32) -> Type {
        Type::Scalar(ScalarKind::Float, width)
    }

    pub fn complex(width: u32) -> Type {
        Type::Scalar(ScalarKind::Complex, width)
    }

    pub fn string() -> Type {
        Type::Scalar(ScalarKind::String, 0)
    }

    pub fn fixed(element: Type, len: usize) -> Type {
        Type::FixedArray(Box::new(element), len)
    }

    pub fn var(element: Type) -> Type {
        Type::VariableArray(Box::new(element))
    }

    pub fn record(fields: Vec<(&str, Type)>) -> Type {
        Type::Struct(
            fields
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        )
    }

    /// Look up a scalar type by its datashape name.
    pub fn from_scalar_name(name: &str) -> Option<Type> {
        let ty = match name {
            "bool" => Type::bool(),
            "int8" => Type::int(8),
            "int16" => Type::int(16),
            "int32" => Type::int(32),
            "int64" => Type::int(64),
            "uint8" => Type::uint(8),
            "uint16" => Type::uint(16),
            "uint32" => Type::uint(32),
            "uint64" => Type::uint(64),
            "float32" => Type::float(32),
            "float64" => Type::float(64),
            "complex64" => Type::complex(64),
            "complex128" => Type::complex(128),
            "string" => Type::string(),
            "unknown" => Type::Unknown,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(..))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::FixedArray(..) | Type::VariableArray(..))
    }

    pub fn scalar(&self) -> Option<(ScalarKind, u32)> {
        match self {
            Type::Scalar(kind, width) => Some((*kind, *width)),
            _ => None,
        }
    }

    /// Number of leading array dimensions.
    pub fn ndim(&self) -> usize {
        match self {
            Type::FixedArray(elem, _) | Type::VariableArray(elem) => 1 + elem.ndim(),
            _ => 0,
        }
    }

    /// Leading dimensions, outermost first.
    pub fn dims(&self) -> Vec<Dim> {
        let mut dims = Vec::new();
        let mut ty = self;
        loop {
            match ty {
                Type::FixedArray(elem, n) => {
                    dims.push(Dim::Fixed(*n));
                    ty = elem;
                }
                Type::VariableArray(elem) => {
                    dims.push(Dim::Var);
                    ty = elem;
                }
                _ => return dims,
            }
        }
    }

    /// The type with one leading dimension removed.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::FixedArray(elem, _) | Type::VariableArray(elem) => Some(elem),
            _ => None,
        }
    }

    /// The type with `count` leading dimensions removed.
    pub fn strip_dims(&self, count: usize) -> Option<&Type> {
        let mut ty = self;
        for _ in 0..count {
            ty = ty.element()?;
        }
        Some(ty)
    }

    /// The innermost non-array type.
    pub fn innermost(&self) -> &Type {
        let mut ty = self;
        while let Some(elem) = ty.element() {
            ty = elem;
        }
        ty
    }

    /// Wrap `inner` in the given leading dimensions.
    pub fn with_dims(dims: &[Dim], inner: Type) -> Type {
        dims.iter().rev().fold(inner, |acc, dim| match dim {
            Dim::Fixed(n) => Type::fixed(acc, *n),
            Dim::Var => Type::var(acc),
        })
    }

    pub fn contains_unknown(&self) -> bool {
        match self {
            Type::Unknown => true,
            Type::Scalar(..) => false,
            Type::FixedArray(elem, _) | Type::VariableArray(elem) => elem.contains_unknown(),
            Type::Struct(fields) => fields.iter().any(|(_, ty)| ty.contains_unknown()),
        }
    }

    /// Replace every `Unknown` with `default`.
    pub fn resolve_unknown(&self, default: &Type) -> Type {
        match self {
            Type::Unknown => default.clone(),
            Type::Scalar(..) => self.clone(),
            Type::FixedArray(elem, n) => Type::fixed(elem.resolve_unknown(default), *n),
            Type::VariableArray(elem) => Type::var(elem.resolve_unknown(default)),
            Type::Struct(fields) => Type::Struct(
                fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.resolve_unknown(default)))
                    .collect(),
            ),
        }
    }

    /// Bytes of out-of-band metadata needed to interpret a value of this
    /// type: one reference slot per ragged dimension or string it contains.
    pub fn metadata_size(&self) -> usize {
        match self {
            Type::Unknown => 0,
            Type::Scalar(ScalarKind::String, _) => SLOT_SIZE,
            Type::Scalar(..) => 0,
            Type::FixedArray(elem, _) => elem.metadata_size(),
            Type::VariableArray(elem) => SLOT_SIZE + elem.metadata_size(),
            Type::Struct(fields) => fields.iter().map(|(_, ty)| ty.metadata_size()).sum(),
        }
    }

    /// Inline size in bytes (packed, no padding).
    pub fn data_size(&self) -> usize {
        match self {
            Type::Unknown => 0,
            Type::Scalar(ScalarKind::String, _) => SLOT_SIZE,
            Type::Scalar(ScalarKind::Bool, _) => 1,
            Type::Scalar(_, width) => (*width / 8) as usize,
            Type::FixedArray(elem, n) => elem.data_size() * n,
            Type::VariableArray(_) => SLOT_SIZE,
            Type::Struct(fields) => fields.iter().map(|(_, ty)| ty.data_size()).sum(),
        }
    }

    /// Byte offset and type of a struct field.
    pub fn field(&self, name: &str) -> Option<(usize, &Type)> {
        let Type::Struct(fields) = self else {
            return None;
        };
        let mut offset = 0;
        for (field_name, ty) in fields {
            if field_name == name {
                return Some((offset, ty));
            }
            offset += ty.data_size();
        }
        None
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => f.write_str("unknown"),
            Type::Scalar(kind, width) => match kind {
                ScalarKind::Bool => f.write_str("bool"),
                ScalarKind::UInt => write!(f, "uint{}", width),
                ScalarKind::Int => write!(f, "int{}", width),
                ScalarKind::Float => write!(f, "float{}", width),
                ScalarKind::Complex => write!(f, "complex{}", width),
                ScalarKind::String => f.write_str("string"),
            },
            Type::FixedArray(elem, n) => write!(f, "{} * {}", n, elem),
            Type::VariableArray(elem) => write!(f, "var * {}", elem),
            Type::Struct(fields) => {
                f.write_str("{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                f.write_str("}")
            }
        }
    }
}
