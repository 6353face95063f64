//! Built-in scalar operations and user closures over [`Value`]s.

use std::fmt;
use std::sync::Arc;

use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{ScalarKind, Type};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    Negative,
    Absolute,
    Square,
    Sqrt,
    Equal,
    Less,
    Greater,
    LogicalAnd,
    LogicalOr,
}

const ALL: [PrimitiveOp; 15] = [
    PrimitiveOp::Add,
    PrimitiveOp::Subtract,
    PrimitiveOp::Multiply,
    PrimitiveOp::Divide,
    PrimitiveOp::Maximum,
    PrimitiveOp::Minimum,
    PrimitiveOp::Negative,
    PrimitiveOp::Absolute,
    PrimitiveOp::Square,
    PrimitiveOp::Sqrt,
    PrimitiveOp::Equal,
    PrimitiveOp::Less,
    PrimitiveOp::Greater,
    PrimitiveOp::LogicalAnd,
    PrimitiveOp::LogicalOr,
];

impl PrimitiveOp {
    pub fn parse(name: &str) -> Option<PrimitiveOp> {
        ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn all() -> &'static [PrimitiveOp] {
        &ALL
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveOp::Add => "add",
            PrimitiveOp::Subtract => "subtract",
            PrimitiveOp::Multiply => "multiply",
            PrimitiveOp::Divide => "divide",
            PrimitiveOp::Maximum => "maximum",
            PrimitiveOp::Minimum => "minimum",
            PrimitiveOp::Negative => "negative",
            PrimitiveOp::Absolute => "absolute",
            PrimitiveOp::Square => "square",
            PrimitiveOp::Sqrt => "sqrt",
            PrimitiveOp::Equal => "equal",
            PrimitiveOp::Less => "less",
            PrimitiveOp::Greater => "greater",
            PrimitiveOp::LogicalAnd => "logical_and",
            PrimitiveOp::LogicalOr => "logical_or",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            PrimitiveOp::Negative | PrimitiveOp::Absolute | PrimitiveOp::Square | PrimitiveOp::Sqrt => 1,
            _ => 2,
        }
    }

    /// Two operands of the same type, boolean result.
    pub fn is_predicate(self) -> bool {
        matches!(self, PrimitiveOp::Equal | PrimitiveOp::Less | PrimitiveOp::Greater)
    }

    /// Parameter and return types when applied to scalars of `ty`.
    pub(crate) fn signature(self, ty: &Type) -> Result<(Vec<Type>, Type), Diagnostic> {
        let Some((kind, width)) = ty.scalar() else {
            return Err(self.unsupported(ty));
        };
        let ok = match self {
            PrimitiveOp::Add | PrimitiveOp::Subtract | PrimitiveOp::Multiply | PrimitiveOp::Divide => {
                kind.is_numeric() && kind != ScalarKind::Bool
            }
            PrimitiveOp::Negative | PrimitiveOp::Square => {
                matches!(kind, ScalarKind::Int | ScalarKind::Float | ScalarKind::Complex)
            }
            PrimitiveOp::Absolute => {
                matches!(kind, ScalarKind::Int | ScalarKind::Float | ScalarKind::Complex)
            }
            PrimitiveOp::Sqrt => matches!(kind, ScalarKind::Float | ScalarKind::Complex),
            PrimitiveOp::Maximum | PrimitiveOp::Minimum | PrimitiveOp::Less | PrimitiveOp::Greater => {
                kind.is_numeric() && kind != ScalarKind::Complex
            }
            PrimitiveOp::Equal => true,
            PrimitiveOp::LogicalAnd | PrimitiveOp::LogicalOr => kind.is_numeric(),
        };
        if !ok {
            return Err(self.unsupported(ty));
        }
        let params = vec![ty.clone(); self.arity()];
        let ret = match self {
            _ if self.is_predicate() => Type::bool(),
            PrimitiveOp::LogicalAnd | PrimitiveOp::LogicalOr => Type::bool(),
            PrimitiveOp::Absolute if kind == ScalarKind::Complex => Type::float(width / 2),
            _ => ty.clone(),
        };
        Ok((params, ret))
    }

    fn unsupported(self, ty: &Type) -> Diagnostic {
        Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("`{}` is not defined for `{}`", self.name(), ty),
        )
    }

    /// Apply to operands read from their declared types. Integer arithmetic
    /// wraps; the destination conversion truncates to its width.
    pub(crate) fn eval(self, args: &[Value]) -> Result<Value, Diagnostic> {
        use PrimitiveOp::*;

        let arity_error = || {
            Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("`{}` expects {} operands, got {}", self.name(), self.arity(), args.len()),
            )
        };
        match (self, args) {
            (LogicalAnd, [a, b]) => Ok(Value::Bool(a.truthiness()? && b.truthiness()?)),
            (LogicalOr, [a, b]) => Ok(Value::Bool(a.truthiness()? || b.truthiness()?)),
            (Equal, [a, b]) => Ok(Value::Bool(a == b)),
            (_, [a]) if self.arity() == 1 => self.unary(a),
            (_, [a, b]) if self.arity() == 2 => self.binary(a, b),
            _ => Err(arity_error()),
        }
    }

    fn unary(self, a: &Value) -> Result<Value, Diagnostic> {
        use PrimitiveOp::*;

        let v = match (self, a) {
            (Negative, Value::Int(x)) => Value::Int(x.wrapping_neg()),
            (Negative, Value::Float(x)) => Value::Float(-x),
            (Negative, Value::Complex(re, im)) => Value::Complex(-re, -im),
            (Absolute, Value::Int(x)) => Value::Int(x.wrapping_abs()),
            (Absolute, Value::Float(x)) => Value::Float(x.abs()),
            (Absolute, Value::Complex(re, im)) => Value::Float(re.hypot(*im)),
            (Square, Value::Int(x)) => Value::Int(x.wrapping_mul(*x)),
            (Square, Value::Float(x)) => Value::Float(x * x),
            (Square, Value::Complex(re, im)) => Value::Complex(re * re - im * im, 2.0 * re * im),
            (Sqrt, Value::Float(x)) => Value::Float(x.sqrt()),
            (Sqrt, Value::Complex(re, im)) => {
                let r = re.hypot(*im);
                let out_re = ((r + re) / 2.0).sqrt();
                let out_im = ((r - re) / 2.0).sqrt().copysign(*im);
                Value::Complex(out_re, out_im)
            }
            _ => return Err(self.bad_operand(a)),
        };
        Ok(v)
    }

    fn binary(self, a: &Value, b: &Value) -> Result<Value, Diagnostic> {
        use PrimitiveOp::*;

        let v = match (a, b) {
            (Value::Int(x), Value::Int(y)) => match self {
                Add => Value::Int(x.wrapping_add(*y)),
                Subtract => Value::Int(x.wrapping_sub(*y)),
                Multiply => Value::Int(x.wrapping_mul(*y)),
                Divide => match x.checked_div(*y) {
                    Some(q) => Value::Int(q),
                    None if *y == 0 => return Err(division_by_zero()),
                    None => Value::Int(x.wrapping_div(*y)),
                },
                Maximum => Value::Int(*x.max(y)),
                Minimum => Value::Int(*x.min(y)),
                Less => Value::Bool(x < y),
                Greater => Value::Bool(x > y),
                _ => return Err(self.bad_operand(a)),
            },
            (Value::UInt(x), Value::UInt(y)) => match self {
                Add => Value::UInt(x.wrapping_add(*y)),
                Subtract => Value::UInt(x.wrapping_sub(*y)),
                Multiply => Value::UInt(x.wrapping_mul(*y)),
                Divide => Value::UInt(x.checked_div(*y).ok_or_else(division_by_zero)?),
                Maximum => Value::UInt(*x.max(y)),
                Minimum => Value::UInt(*x.min(y)),
                Less => Value::Bool(x < y),
                Greater => Value::Bool(x > y),
                _ => return Err(self.bad_operand(a)),
            },
            (Value::Float(x), Value::Float(y)) => match self {
                Add => Value::Float(x + y),
                Subtract => Value::Float(x - y),
                Multiply => Value::Float(x * y),
                Divide => Value::Float(x / y),
                Maximum => Value::Float(if x.is_nan() || x >= y { *x } else { *y }),
                Minimum => Value::Float(if x.is_nan() || x <= y { *x } else { *y }),
                Less => Value::Bool(x < y),
                Greater => Value::Bool(x > y),
                _ => return Err(self.bad_operand(a)),
            },
            (Value::Complex(ar, ai), Value::Complex(br, bi)) => match self {
                Add => Value::Complex(ar + br, ai + bi),
                Subtract => Value::Complex(ar - br, ai - bi),
                Multiply => Value::Complex(ar * br - ai * bi, ar * bi + ai * br),
                Divide => {
                    let denom = br * br + bi * bi;
                    Value::Complex((ar * br + ai * bi) / denom, (ai * br - ar * bi) / denom)
                }
                _ => return Err(self.bad_operand(a)),
            },
            (Value::Bool(x), Value::Bool(y)) => match self {
                Maximum => Value::Bool(*x || *y),
                Minimum => Value::Bool(*x && *y),
                Less => Value::Bool(!x & y),
                Greater => Value::Bool(x & !y),
                _ => return Err(self.bad_operand(a)),
            },
            _ => return Err(self.bad_operand(a)),
        };
        Ok(v)
    }

    fn bad_operand(self, a: &Value) -> Diagnostic {
        Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("`{}` cannot be applied to {}", self.name(), a),
        )
    }
}

fn division_by_zero() -> Diagnostic {
    Diagnostic::error(ErrorCode::ConversionError, "integer division by zero".to_string())
}

type ClosureFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A named scalar function over [`Value`]s, supplied by the caller.
#[derive(Clone)]
pub struct ScalarFn {
    name: String,
    func: Arc<ClosureFn>,
}

impl ScalarFn {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, args: &[Value]) -> Result<Value, Diagnostic> {
        (self.func)(args).map_err(|msg| {
            Diagnostic::error(
                ErrorCode::ForeignCallFailed,
                format!("function `{}` failed: {}", self.name, msg),
            )
        })
    }
}

impl fmt::Debug for ScalarFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScalarFn({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        for &op in PrimitiveOp::all() {
            assert_eq!(PrimitiveOp::parse(op.name()), Some(op));
        }
        assert_eq!(PrimitiveOp::parse("power"), None);
    }

    #[test]
    fn test_signatures() {
        let (params, ret) = PrimitiveOp::Add.signature(&Type::int(32)).unwrap();
        assert_eq!(params, vec![Type::int(32), Type::int(32)]);
        assert_eq!(ret, Type::int(32));
        let (_, ret) = PrimitiveOp::Less.signature(&Type::float(64)).unwrap();
        assert_eq!(ret, Type::bool());
        let (_, ret) = PrimitiveOp::Absolute.signature(&Type::complex(128)).unwrap();
        assert_eq!(ret, Type::float(64));
        assert!(PrimitiveOp::Sqrt.signature(&Type::int(64)).is_err());
        assert!(PrimitiveOp::Add.signature(&Type::string()).is_err());
        assert!(PrimitiveOp::Less.signature(&Type::complex(64)).is_err());
        assert!(PrimitiveOp::Add.signature(&Type::fixed(Type::int(8), 2)).is_err());
    }

    #[test]
    fn test_integer_arithmetic_wraps() {
        let v = PrimitiveOp::Add.eval(&[Value::Int(i64::MAX), Value::Int(1)]).unwrap();
        assert_eq!(v, Value::Int(i64::MIN));
        let err = PrimitiveOp::Divide.eval(&[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert!(err.is(ErrorCode::ConversionError));
    }

    #[test]
    fn test_complex_ops() {
        let v = PrimitiveOp::Multiply
            .eval(&[Value::Complex(1.0, 2.0), Value::Complex(3.0, -1.0)])
            .unwrap();
        assert_eq!(v, Value::Complex(5.0, 5.0));
        let v = PrimitiveOp::Sqrt.eval(&[Value::Complex(-4.0, 0.0)]).unwrap();
        assert_eq!(v, Value::Complex(0.0, 2.0));
    }

    #[test]
    fn test_predicates() {
        assert_eq!(
            PrimitiveOp::Less.eval(&[Value::Float(1.0), Value::Float(2.0)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            PrimitiveOp::Equal.eval(&[Value::Str("a".into()), Value::Str("a".into())]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            PrimitiveOp::LogicalAnd.eval(&[Value::Int(2), Value::Int(0)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_closure_errors_are_foreign_failures() {
        let f = ScalarFn::new("fail", |_| Err("boom".to_string()));
        let err = f.call(&[]).unwrap_err();
        assert!(err.is(ErrorCode::ForeignCallFailed));
        assert!(err.message.contains("boom"));
    }
}
