//! Scalar codecs and checked numeric conversion.

use bytemuck::Pod;

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{ScalarKind, Type};
use crate::value::Value;

/// How strictly a scalar conversion checks for information loss. Each mode
/// includes the checks of the modes before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorMode {
    /// Wrap, truncate and round silently.
    None,
    /// Reject values outside the destination range.
    Overflow,
    /// Also reject dropping a fractional or imaginary part.
    #[default]
    Fractional,
    /// Also reject any rounding.
    Inexact,
}

impl ErrorMode {
    pub fn parse(name: &str) -> Result<ErrorMode, Diagnostic> {
        match name {
            "none" => Ok(ErrorMode::None),
            "overflow" => Ok(ErrorMode::Overflow),
            "fractional" | "default" => Ok(ErrorMode::Fractional),
            "inexact" => Ok(ErrorMode::Inexact),
            _ => Err(Diagnostic::error(
                ErrorCode::InvalidErrorMode,
                format!("invalid error mode '{}'", name),
            )
            .with_help("expected one of: none, overflow, fractional, inexact, default".to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorMode::None => "none",
            ErrorMode::Overflow => "overflow",
            ErrorMode::Fractional => "fractional",
            ErrorMode::Inexact => "inexact",
        }
    }
}

pub(crate) fn load<T: Pod>(bytes: &[u8], at: usize) -> Result<T, Diagnostic> {
    let n = std::mem::size_of::<T>();
    let raw = bytes
        .get(at..at + n)
        .ok_or_else(|| out_of_range(at, n, bytes.len()))?;
    Ok(bytemuck::pod_read_unaligned(raw))
}

pub(crate) fn store<T: Pod>(bytes: &mut [u8], at: usize, value: T) -> Result<(), Diagnostic> {
    let n = std::mem::size_of::<T>();
    let len = bytes.len();
    let raw = bytes
        .get_mut(at..at + n)
        .ok_or_else(|| out_of_range(at, n, len))?;
    raw.copy_from_slice(bytemuck::bytes_of(&value));
    Ok(())
}

fn out_of_range(at: usize, n: usize, len: usize) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::IndexOutOfBounds,
        format!("access of {} bytes at offset {} overruns a buffer of {} bytes", n, at, len),
    )
}

/// Read an out-of-line reference slot.
pub(crate) fn read_slot(bytes: &[u8], at: usize) -> Result<(usize, usize), Diagnostic> {
    let [offset, len]: [u64; 2] = load(bytes, at)?;
    Ok((offset as usize, len as usize))
}

pub(crate) fn write_slot(bytes: &mut [u8], at: usize, offset: usize, len: usize) -> Result<(), Diagnostic> {
    store(bytes, at, [offset as u64, len as u64])
}

pub(crate) fn read_scalar(
    bytes: &[u8],
    at: usize,
    kind: ScalarKind,
    width: u32,
) -> Result<Value, Diagnostic> {
    let value = match (kind, width) {
        (ScalarKind::Bool, _) => Value::Bool(load::<u8>(bytes, at)? != 0),
        (ScalarKind::Int, 8) => Value::Int(load::<i8>(bytes, at)? as i64),
        (ScalarKind::Int, 16) => Value::Int(load::<i16>(bytes, at)? as i64),
        (ScalarKind::Int, 32) => Value::Int(load::<i32>(bytes, at)? as i64),
        (ScalarKind::Int, 64) => Value::Int(load::<i64>(bytes, at)?),
        (ScalarKind::UInt, 8) => Value::UInt(load::<u8>(bytes, at)? as u64),
        (ScalarKind::UInt, 16) => Value::UInt(load::<u16>(bytes, at)? as u64),
        (ScalarKind::UInt, 32) => Value::UInt(load::<u32>(bytes, at)? as u64),
        (ScalarKind::UInt, 64) => Value::UInt(load::<u64>(bytes, at)?),
        (ScalarKind::Float, 32) => Value::Float(load::<f32>(bytes, at)? as f64),
        (ScalarKind::Float, 64) => Value::Float(load::<f64>(bytes, at)?),
        (ScalarKind::Complex, 64) => {
            let [re, im]: [f32; 2] = load(bytes, at)?;
            Value::Complex(re as f64, im as f64)
        }
        (ScalarKind::Complex, 128) => {
            let [re, im]: [f64; 2] = load(bytes, at)?;
            Value::Complex(re, im)
        }
        (ScalarKind::String, _) => {
            let (offset, len) = read_slot(bytes, at)?;
            let raw = bytes
                .get(offset..offset + len)
                .ok_or_else(|| out_of_range(offset, len, bytes.len()))?;
            let text = std::str::from_utf8(raw).map_err(|_| {
                Diagnostic::error(
                    ErrorCode::ConversionError,
                    format!("string at offset {} is not valid UTF-8", offset),
                )
            })?;
            Value::Str(text.to_string())
        }
        _ => return Err(unsupported_width(kind, width)),
    };
    Ok(value)
}

/// Convert `value` to the scalar type `(kind, width)` under `mode` and
/// store it. Strings need heap space and are written by the layout code.
pub(crate) fn write_scalar(
    bytes: &mut [u8],
    at: usize,
    kind: ScalarKind,
    width: u32,
    value: &Value,
    mode: ErrorMode,
) -> Result<(), Diagnostic> {
    let target = Type::Scalar(kind, width);
    match kind {
        ScalarKind::Bool => {
            let b = to_bool(value, mode, &target)?;
            store(bytes, at, b as u8)
        }
        ScalarKind::Int | ScalarKind::UInt => {
            let v = to_integer(value, mode, &target)?;
            let v = fit_integer(v, kind == ScalarKind::Int, width, mode, &target)?;
            match (kind, width) {
                (ScalarKind::Int, 8) => store(bytes, at, v as i8),
                (ScalarKind::Int, 16) => store(bytes, at, v as i16),
                (ScalarKind::Int, 32) => store(bytes, at, v as i32),
                (ScalarKind::Int, 64) => store(bytes, at, v as i64),
                (ScalarKind::UInt, 8) => store(bytes, at, v as u8),
                (ScalarKind::UInt, 16) => store(bytes, at, v as u16),
                (ScalarKind::UInt, 32) => store(bytes, at, v as u32),
                (ScalarKind::UInt, 64) => store(bytes, at, v as u64),
                _ => Err(unsupported_width(kind, width)),
            }
        }
        ScalarKind::Float => {
            let f = to_real(value, mode, &target)?;
            match width {
                32 => store(bytes, at, narrow_f32(f, mode, &target)?),
                64 => store(bytes, at, f),
                _ => Err(unsupported_width(kind, width)),
            }
        }
        ScalarKind::Complex => {
            let (re, im) = to_complex(value, mode, &target)?;
            match width {
                64 => store(
                    bytes,
                    at,
                    [narrow_f32(re, mode, &target)?, narrow_f32(im, mode, &target)?],
                ),
                128 => store(bytes, at, [re, im]),
                _ => Err(unsupported_width(kind, width)),
            }
        }
        ScalarKind::String => Err(Diagnostic::error(
            ErrorCode::MetadataMismatch,
            "string storage requires an out-of-line heap".to_string(),
        )),
    }
}

fn to_bool(value: &Value, mode: ErrorMode, target: &Type) -> Result<bool, Diagnostic> {
    if let Value::Bool(b) = value {
        return Ok(*b);
    }
    let (re, im) = to_complex(value, ErrorMode::None, target)?;
    if mode >= ErrorMode::Overflow && !(im == 0.0 && (re == 0.0 || re == 1.0)) {
        return Err(lossy(value, target, "only 0 and 1 convert to bool"));
    }
    Ok(re != 0.0 || im != 0.0)
}

fn to_integer(value: &Value, mode: ErrorMode, target: &Type) -> Result<i128, Diagnostic> {
    match value {
        Value::Bool(b) => Ok(*b as i128),
        Value::Int(i) => Ok(*i as i128),
        Value::UInt(u) => Ok(*u as i128),
        Value::Float(f) => float_to_integer(*f, value, mode, target),
        Value::Complex(re, im) => {
            if *im != 0.0 && mode >= ErrorMode::Fractional {
                return Err(lossy(value, target, "the imaginary part would be discarded"));
            }
            float_to_integer(*re, value, mode, target)
        }
        _ => Err(not_numeric(value, target)),
    }
}

fn float_to_integer(f: f64, value: &Value, mode: ErrorMode, target: &Type) -> Result<i128, Diagnostic> {
    if !f.is_finite() {
        if mode >= ErrorMode::Overflow {
            return Err(lossy(value, target, "non-finite values have no integer form"));
        }
        return Ok(0);
    }
    if f.fract() != 0.0 && mode >= ErrorMode::Fractional {
        return Err(lossy(value, target, "the fractional part would be discarded"));
    }
    // saturating cast; range is checked by fit_integer
    Ok(f.trunc() as i128)
}

fn fit_integer(v: i128, signed: bool, width: u32, mode: ErrorMode, target: &Type) -> Result<i128, Diagnostic> {
    let (min, max) = if signed {
        (-(1i128 << (width - 1)), (1i128 << (width - 1)) - 1)
    } else {
        (0, (1i128 << width) - 1)
    };
    if v < min || v > max {
        if mode >= ErrorMode::Overflow {
            return Err(Diagnostic::error(
                ErrorCode::ConversionError,
                format!("value {} overflows `{}`", v, target),
            ));
        }
        // wrap to the low bits
        return Ok(v & ((1i128 << width) - 1));
    }
    Ok(v)
}

fn to_real(value: &Value, mode: ErrorMode, target: &Type) -> Result<f64, Diagnostic> {
    match value {
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => {
            let f = *i as f64;
            if mode >= ErrorMode::Inexact && f as i128 != *i as i128 {
                return Err(lossy(value, target, "the integer is not exactly representable"));
            }
            Ok(f)
        }
        Value::UInt(u) => {
            let f = *u as f64;
            if mode >= ErrorMode::Inexact && f as u128 != *u as u128 {
                return Err(lossy(value, target, "the integer is not exactly representable"));
            }
            Ok(f)
        }
        Value::Float(f) => Ok(*f),
        Value::Complex(re, im) => {
            if *im != 0.0 && mode >= ErrorMode::Fractional {
                return Err(lossy(value, target, "the imaginary part would be discarded"));
            }
            Ok(*re)
        }
        _ => Err(not_numeric(value, target)),
    }
}

fn to_complex(value: &Value, mode: ErrorMode, target: &Type) -> Result<(f64, f64), Diagnostic> {
    match value {
        Value::Complex(re, im) => Ok((*re, *im)),
        other => Ok((to_real(other, mode, target)?, 0.0)),
    }
}

fn narrow_f32(f: f64, mode: ErrorMode, target: &Type) -> Result<f32, Diagnostic> {
    let narrowed = f as f32;
    if mode >= ErrorMode::Overflow && f.is_finite() && narrowed.is_infinite() {
        return Err(Diagnostic::error(
            ErrorCode::ConversionError,
            format!("value {} overflows `{}`", f, target),
        ));
    }
    if mode >= ErrorMode::Inexact && !f.is_nan() && narrowed as f64 != f {
        return Err(Diagnostic::error(
            ErrorCode::ConversionError,
            format!("value {} is not exactly representable as `{}`", f, target),
        ));
    }
    Ok(narrowed)
}

fn lossy(value: &Value, target: &Type, why: &str) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ConversionError,
        format!("cannot convert {} to `{}`", value, target),
    )
    .with_note(why.to_string())
}

fn not_numeric(value: &Value, target: &Type) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::TypeMismatch,
        format!("cannot store {} in a `{}` slot", value, target),
    )
}

fn unsupported_width(kind: ScalarKind, width: u32) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::TypeMismatch,
        format!("unsupported width {} for {:?}", width, kind),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(kind: ScalarKind, width: u32, value: &Value, mode: ErrorMode) -> Result<Value, Diagnostic> {
        let mut buf = vec![0u8; 16];
        write_scalar(&mut buf, 0, kind, width, value, mode)?;
        read_scalar(&buf, 0, kind, width)
    }

    #[test]
    fn test_error_mode_parse() {
        assert_eq!(ErrorMode::parse("default").unwrap(), ErrorMode::Fractional);
        assert_eq!(ErrorMode::parse("none").unwrap(), ErrorMode::None);
        assert_eq!(ErrorMode::parse("inexact").unwrap(), ErrorMode::Inexact);
        let err = ErrorMode::parse("strict").unwrap_err();
        assert!(err.is(ErrorCode::InvalidErrorMode));
    }

    #[test]
    fn test_int_to_float() {
        let v = roundtrip(ScalarKind::Float, 64, &Value::Int(3), ErrorMode::Inexact).unwrap();
        assert_eq!(v, Value::Float(3.0));
    }

    #[test]
    fn test_overflow_detection() {
        let err = roundtrip(ScalarKind::Int, 8, &Value::Int(300), ErrorMode::Overflow).unwrap_err();
        assert!(err.is(ErrorCode::ConversionError));
        let wrapped = roundtrip(ScalarKind::Int, 8, &Value::Int(300), ErrorMode::None).unwrap();
        assert_eq!(wrapped, Value::Int(44));
        let err = roundtrip(ScalarKind::UInt, 16, &Value::Int(-1), ErrorMode::Overflow).unwrap_err();
        assert!(err.is(ErrorCode::ConversionError));
    }

    #[test]
    fn test_fractional_detection() {
        let err = roundtrip(ScalarKind::Int, 32, &Value::Float(2.5), ErrorMode::Fractional).unwrap_err();
        assert!(err.is(ErrorCode::ConversionError));
        let ok = roundtrip(ScalarKind::Int, 32, &Value::Float(2.5), ErrorMode::Overflow).unwrap();
        assert_eq!(ok, Value::Int(2));
        let ok = roundtrip(ScalarKind::Int, 32, &Value::Float(-4.0), ErrorMode::Fractional).unwrap();
        assert_eq!(ok, Value::Int(-4));
    }

    #[test]
    fn test_inexact_detection() {
        let err = roundtrip(ScalarKind::Float, 32, &Value::Float(0.1), ErrorMode::Inexact).unwrap_err();
        assert!(err.is(ErrorCode::ConversionError));
        assert!(roundtrip(ScalarKind::Float, 32, &Value::Float(0.5), ErrorMode::Inexact).is_ok());
        let big = Value::Int((1i64 << 53) + 1);
        assert!(roundtrip(ScalarKind::Float, 64, &big, ErrorMode::Inexact).is_err());
        assert!(roundtrip(ScalarKind::Float, 64, &big, ErrorMode::Fractional).is_ok());
    }

    #[test]
    fn test_complex_to_real_drops_imaginary_only_when_allowed() {
        let z = Value::Complex(1.0, 2.0);
        assert!(roundtrip(ScalarKind::Float, 64, &z, ErrorMode::Fractional).is_err());
        assert_eq!(
            roundtrip(ScalarKind::Float, 64, &z, ErrorMode::Overflow).unwrap(),
            Value::Float(1.0)
        );
        assert_eq!(
            roundtrip(ScalarKind::Complex, 64, &Value::Int(2), ErrorMode::Inexact).unwrap(),
            Value::Complex(2.0, 0.0)
        );
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(
            roundtrip(ScalarKind::Bool, 8, &Value::Int(1), ErrorMode::Overflow).unwrap(),
            Value::Bool(true)
        );
        assert!(roundtrip(ScalarKind::Bool, 8, &Value::Int(2), ErrorMode::Overflow).is_err());
        assert_eq!(
            roundtrip(ScalarKind::Bool, 8, &Value::Int(2), ErrorMode::None).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_string_to_number_is_mismatch() {
        let err = roundtrip(ScalarKind::Int, 64, &Value::Str("1".into()), ErrorMode::None).unwrap_err();
        assert!(err.is(ErrorCode::TypeMismatch));
    }

    #[test]
    fn test_out_of_bounds_access() {
        let buf = [0u8; 4];
        let err = load::<u64>(&buf, 0).unwrap_err();
        assert!(err.is(ErrorCode::IndexOutOfBounds));
    }
}
