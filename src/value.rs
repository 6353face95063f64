//! Dynamically typed values: the leaves and trees fed to the builder, and
//! what arrays read back into.

use std::fmt;

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::Type;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
}

impl Value {
    /// The natural type of a leaf value. Lists and records are typed by the
    /// builder, which sees their elements.
    pub fn leaf_type(&self) -> Result<Type, Diagnostic> {
        match self {
            Value::Bool(_) => Ok(Type::bool()),
            Value::Int(_) => Ok(Type::int(64)),
            Value::UInt(_) => Ok(Type::uint(64)),
            Value::Float(_) => Ok(Type::float(64)),
            Value::Complex(..) => Ok(Type::complex(128)),
            Value::Str(_) => Ok(Type::string()),
            Value::Null => Err(Diagnostic::error(
                ErrorCode::UnsupportedValue,
                "null has no array representation".to_string(),
            )
            .with_help("replace missing values with a sentinel of the element type".to_string())),
            Value::List(_) | Value::Record(_) => Err(Diagnostic::error(
                ErrorCode::UnsupportedValue,
                format!("`{}` is not a leaf value", self),
            )),
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Record(_) | Value::Null)
    }

    /// Interpret a scalar as an integer index. Booleans and floats are
    /// rejected rather than silently truncated.
    pub fn as_index(&self) -> Result<i64, Diagnostic> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::UInt(u) => i64::try_from(*u).map_err(|_| {
                Diagnostic::error(
                    ErrorCode::IndexOutOfBounds,
                    format!("index {} does not fit in a signed 64-bit integer", u),
                )
            }),
            Value::Bool(_) => Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                "a bool cannot be used as an index".to_string(),
            )),
            Value::Float(_) | Value::Complex(..) => Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("only integers can be used as an index, not `{}`", self),
            )),
            _ => Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("`{}` cannot be used as an index", self),
            )),
        }
    }

    /// Truth value of a scalar. Collections are ambiguous.
    pub fn truthiness(&self) -> Result<bool, Diagnostic> {
        match self {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::UInt(u) => Ok(*u != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Complex(re, im) => Ok(*re != 0.0 || *im != 0.0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::List(_) | Value::Record(_) => Err(Diagnostic::error(
                ErrorCode::AmbiguousTruthValue,
                "the truth value of an array with more than one element is ambiguous".to_string(),
            )),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Resolve a possibly negative index against a dimension of length `len`.
pub fn normalize_index(index: i64, len: usize) -> Result<usize, Diagnostic> {
    let resolved = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if resolved < 0 || resolved as usize >= len {
        return Err(Diagnostic::error(
            ErrorCode::IndexOutOfBounds,
            format!("index {} is out of bounds for dimension of length {}", index, len),
        ));
    }
    Ok(resolved as usize)
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        write!(f, "{:.1}", x)
    } else {
        write!(f, "{}", x)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write_float(f, *x),
            Value::Complex(re, im) => {
                f.write_str("(")?;
                write_float(f, *re)?;
                if *im < 0.0 || (*im == 0.0 && im.is_sign_negative()) {
                    f.write_str("-")?;
                    write_float(f, -im)?;
                } else {
                    f.write_str("+")?;
                    write_float(f, *im)?;
                }
                f.write_str("j)")
            }
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Record(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}
