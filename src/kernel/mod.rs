//! Deferred kernels.
//!
//! A [`KernelDescriptor`] is a typed, immutable description of an elementwise
//! operation. It does nothing until it is instantiated into a
//! [`KernelBuffer`] for concrete operand layouts, producing steps that can
//! then be called once per element or over a strided run. Descriptors
//! compose: [`lift`] wraps one in broadcast loops, and [`lift_reduction`]
//! turns a binary one into an axis reduction.

mod assign;
mod buffer;
mod eval;
mod exec;
pub mod lift;
mod primitive;
pub mod reduce;
#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

pub use buffer::{Kernel, KernelBuffer, OperandMeta, DEFAULT_PARALLEL_THRESHOLD};
pub use eval::{apply, apply_with};
pub use lift::{lift, lift_broadcast};
pub use primitive::{PrimitiveOp, ScalarFn};
pub use reduce::{lift_reduction, AxisSet, ReductionSpec};

use crate::array::ErrorMode;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::foreign::InnerLoop;
use crate::types::{ScalarKind, Type};
use assign::{emit_assign, missing_meta};
use buffer::{ForeignFn, ScalarOp, Step};

/// Calling convention of a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FuncProto {
    /// One source, one destination.
    Unary,
    /// Two sources, boolean destination.
    BinaryPredicate,
    /// Any number of sources, one destination.
    Expr,
}

impl FuncProto {
    pub fn parse(name: &str) -> Result<FuncProto, Diagnostic> {
        match name {
            "unary" => Ok(FuncProto::Unary),
            "binary_predicate" => Ok(FuncProto::BinaryPredicate),
            "expr" => Ok(FuncProto::Expr),
            _ => Err(Diagnostic::error(
                ErrorCode::InvalidFunctionPrototype,
                format!("invalid function prototype '{}'", name),
            )
            .with_help("expected one of: unary, expr, binary_predicate".to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FuncProto::Unary => "unary",
            FuncProto::BinaryPredicate => "binary_predicate",
            FuncProto::Expr => "expr",
        }
    }
}

/// Whether a kernel computes one element per call or a strided run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelRequest {
    Single,
    Strided,
}

impl KernelRequest {
    pub fn parse(name: &str) -> Result<KernelRequest, Diagnostic> {
        match name {
            "single" => Ok(KernelRequest::Single),
            "strided" => Ok(KernelRequest::Strided),
            _ => Err(Diagnostic::error(
                ErrorCode::InvalidKernelRequestType,
                format!("invalid kernel request type '{}'", name),
            )
            .with_help("expected 'single' or 'strided'".to_string())),
        }
    }
}

/// Operand types: `params` are the sources, `ret` the destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum DescriptorKind {
    Assignment {
        mode: ErrorMode,
    },
    Property {
        name: String,
        offset: usize,
        field: Type,
        mode: ErrorMode,
    },
    Primitive(PrimitiveOp),
    Closure(ScalarFn),
    Lifted(Arc<KernelDescriptor>),
    Reduction(Arc<reduce::ReductionPlan>),
    Foreign(ForeignFn),
}

#[derive(Clone, Debug)]
pub struct KernelDescriptor {
    sig: Signature,
    proto: FuncProto,
    needs_exclusive: bool,
    kind: DescriptorKind,
}

impl KernelDescriptor {
    /// Convert `src` values to `dst`. The `binary_predicate` form instead
    /// compares a `dst` value against a `src` value converted to `dst`.
    pub fn from_assignment(dst: &Type, src: &Type, proto: &str, errmode: &str) -> Result<Self, Diagnostic> {
        let proto = FuncProto::parse(proto)?;
        let mode = ErrorMode::parse(errmode)?;
        check_assignable(dst, src, mode)?;
        let sig = match proto {
            FuncProto::BinaryPredicate => Signature::new(vec![dst.clone(), src.clone()], Type::bool()),
            FuncProto::Unary | FuncProto::Expr => Signature::new(vec![src.clone()], dst.clone()),
        };
        Ok(Self {
            sig,
            proto,
            needs_exclusive: false,
            kind: DescriptorKind::Assignment { mode },
        })
    }

    /// Read property `name` of `ty`: a struct field, or `real`/`imag` of a
    /// complex scalar. The `binary_predicate` form compares that property of
    /// two operands.
    pub fn from_property(ty: &Type, name: &str, proto: &str, errmode: &str) -> Result<Self, Diagnostic> {
        let proto = FuncProto::parse(proto)?;
        let mode = ErrorMode::parse(errmode)?;
        let (offset, field) = resolve_property(ty, name)?;
        let sig = match proto {
            FuncProto::BinaryPredicate => Signature::new(vec![ty.clone(), ty.clone()], Type::bool()),
            FuncProto::Unary | FuncProto::Expr => {
                check_assignable(&field, &field, mode)?;
                Signature::new(vec![ty.clone()], field.clone())
            }
        };
        Ok(Self {
            sig,
            proto,
            needs_exclusive: false,
            kind: DescriptorKind::Property {
                name: name.to_string(),
                offset,
                field,
                mode,
            },
        })
    }

    /// A built-in arithmetic or comparison kernel over scalars of `ty`.
    pub fn primitive(op: PrimitiveOp, ty: &Type) -> Result<Self, Diagnostic> {
        let (params, ret) = op.signature(ty)?;
        let proto = if op.arity() == 1 {
            FuncProto::Unary
        } else if op.is_predicate() {
            FuncProto::BinaryPredicate
        } else {
            FuncProto::Expr
        };
        Ok(Self {
            sig: Signature::new(params, ret),
            proto,
            needs_exclusive: false,
            kind: DescriptorKind::Primitive(op),
        })
    }

    /// Wrap a caller-supplied function. Operands are decoded to [`Value`]s
    /// and the result is encoded as `sig.ret`.
    ///
    /// [`Value`]: crate::value::Value
    pub fn from_fn(sig: Signature, proto: FuncProto, func: ScalarFn) -> Result<Self, Diagnostic> {
        let arity_ok = match proto {
            FuncProto::Unary => sig.arity() == 1,
            FuncProto::BinaryPredicate => sig.arity() == 2 && sig.ret == Type::bool(),
            FuncProto::Expr => sig.arity() >= 1,
        };
        if !arity_ok {
            return Err(Diagnostic::error(
                ErrorCode::InvalidFunctionPrototype,
                format!("signature {} does not fit the '{}' prototype", sig, proto.name()),
            ));
        }
        check_destination(&sig.ret)?;
        Ok(Self {
            sig,
            proto,
            needs_exclusive: false,
            kind: DescriptorKind::Closure(func),
        })
    }

    pub(crate) fn foreign(
        function: &str,
        sig: Signature,
        inner: Arc<dyn InnerLoop>,
        needs_exclusive: bool,
    ) -> Result<Self, Diagnostic> {
        for ty in sig.params.iter().chain(std::iter::once(&sig.ret)) {
            if ty.metadata_size() > 0 {
                return Err(Diagnostic::error(
                    ErrorCode::MetadataMismatch,
                    format!("foreign loops take fixed-size operands, not `{}`", ty),
                ));
            }
        }
        let proto = if sig.arity() == 1 {
            FuncProto::Unary
        } else {
            FuncProto::Expr
        };
        Ok(Self {
            sig,
            proto,
            needs_exclusive,
            kind: DescriptorKind::Foreign(ForeignFn {
                name: function.to_string(),
                inner,
            }),
        })
    }

    pub(crate) fn from_parts(sig: Signature, proto: FuncProto, needs_exclusive: bool, kind: DescriptorKind) -> Self {
        Self {
            sig,
            proto,
            needs_exclusive,
            kind,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    pub fn proto(&self) -> FuncProto {
        self.proto
    }

    pub fn arity(&self) -> usize {
        self.sig.arity()
    }

    /// Calls must be serialized; the kernel is never run in parallel.
    pub fn needs_exclusive(&self) -> bool {
        self.needs_exclusive
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            DescriptorKind::Assignment { .. } => "assignment",
            DescriptorKind::Property { .. } => "property",
            DescriptorKind::Primitive(_) => "primitive",
            DescriptorKind::Closure(_) => "closure",
            DescriptorKind::Lifted(_) => "lifted",
            DescriptorKind::Reduction(_) => "reduction",
            DescriptorKind::Foreign(_) => "foreign",
        }
    }

    /// Canonical one-line description, children included.
    pub fn describe(&self) -> String {
        let detail = match &self.kind {
            DescriptorKind::Assignment { mode } => format!("assignment[{}]", mode.name()),
            DescriptorKind::Property { name, mode, .. } => format!("property {}[{}]", name, mode.name()),
            DescriptorKind::Primitive(op) => format!("primitive {}", op.name()),
            DescriptorKind::Closure(f) => format!("closure {}", f.name()),
            DescriptorKind::Lifted(child) => format!("lifted {{{}}}", child.describe()),
            DescriptorKind::Reduction(plan) => plan.describe(),
            DescriptorKind::Foreign(f) => format!("foreign {}", f.name),
        };
        let exclusive = if self.needs_exclusive { " exclusive" } else { "" };
        format!("{} {} {}{}", detail, self.proto.name(), self.sig, exclusive)
    }

    /// BLAKE3 hash of [`describe`](Self::describe).
    pub fn fingerprint(&self) -> [u8; 32] {
        *blake3::hash(self.describe().as_bytes()).as_bytes()
    }

    /// First 16 hex digits of the fingerprint.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint()[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Lower into `kb` starting at slot `offset` and return the number of
    /// slots written. `src_meta[i]` describes source `i` and is required for
    /// types with out-of-line parts. On failure every slot this call wrote
    /// gets its previous contents back.
    pub fn instantiate(
        &self,
        kb: &mut KernelBuffer,
        offset: usize,
        dst_meta: Option<&OperandMeta>,
        src_meta: &[Option<&OperandMeta>],
        request: KernelRequest,
    ) -> Result<usize, Diagnostic> {
        let mark = kb.begin();
        let result = self.instantiate_at(kb, offset, dst_meta, src_meta, request);
        match result {
            Ok(_) => kb.commit(),
            Err(_) => kb.rollback(mark),
        }
        result
    }

    fn instantiate_at(
        &self,
        kb: &mut KernelBuffer,
        offset: usize,
        dst_meta: Option<&OperandMeta>,
        src_meta: &[Option<&OperandMeta>],
        request: KernelRequest,
    ) -> Result<usize, Diagnostic> {
        check_destination(&self.sig.ret)?;
        for (i, ty) in self.sig.params.iter().enumerate() {
            if ty.metadata_size() > 0 && meta_at(src_meta, i).is_none() {
                return Err(missing_meta(ty).with_note(format!("operand {}", i)));
            }
        }
        let start = match request {
            KernelRequest::Single => offset,
            KernelRequest::Strided => kb.put(offset, Step::Strided),
        };
        let end = self.emit(kb, start, dst_meta, src_meta)?;
        Ok(end - offset)
    }

    /// Emit this descriptor's steps at `at`; returns the next free slot.
    pub(crate) fn emit(
        &self,
        kb: &mut KernelBuffer,
        at: usize,
        dst_meta: Option<&OperandMeta>,
        src_meta: &[Option<&OperandMeta>],
    ) -> Result<usize, Diagnostic> {
        let contiguous = OperandMeta::contiguous();
        match &self.kind {
            DescriptorKind::Assignment { mode } => match self.proto {
                FuncProto::BinaryPredicate => {
                    let child = kb.put(at, Step::Vacant);
                    let end = emit_assign(
                        kb,
                        child,
                        &self.sig.params[0],
                        &self.sig.params[1],
                        meta_at(src_meta, 1),
                        *mode,
                    )?;
                    kb.put(
                        at,
                        Step::Predicate {
                            ty: self.sig.params[0].clone(),
                            lhs: None,
                            rhs: Some(child),
                        },
                    );
                    Ok(end)
                }
                _ => emit_assign(kb, at, &self.sig.ret, &self.sig.params[0], meta_at(src_meta, 0), *mode),
            },
            DescriptorKind::Property {
                offset, field, mode, ..
            } => match self.proto {
                FuncProto::BinaryPredicate => {
                    let next = kb.put(at, Step::Offset(vec![*offset, *offset]));
                    Ok(kb.put(
                        next,
                        Step::Predicate {
                            ty: field.clone(),
                            lhs: None,
                            rhs: None,
                        },
                    ))
                }
                _ => {
                    let next = kb.put(at, Step::Offset(vec![*offset]));
                    emit_assign(kb, next, &self.sig.ret, field, Some(&contiguous), *mode)
                }
            },
            DescriptorKind::Primitive(op) => Ok(kb.put(
                at,
                Step::Scalar {
                    op: ScalarOp::Primitive(*op),
                    dst: self.sig.ret.clone(),
                    srcs: self.sig.params.clone(),
                },
            )),
            DescriptorKind::Closure(func) => Ok(kb.put(
                at,
                Step::Scalar {
                    op: ScalarOp::Closure(func.clone()),
                    dst: self.sig.ret.clone(),
                    srcs: self.sig.params.clone(),
                },
            )),
            DescriptorKind::Lifted(child) => lift::emit(self, child, kb, at, dst_meta, src_meta),
            DescriptorKind::Reduction(plan) => reduce::emit(plan, !self.needs_exclusive, kb, at, meta_at(src_meta, 0)),
            DescriptorKind::Foreign(func) => Ok(kb.put(
                at,
                Step::Foreign {
                    func: func.clone(),
                    dst_size: self.sig.ret.data_size(),
                    src_sizes: self.sig.params.iter().map(Type::data_size).collect(),
                    exclusive: self.needs_exclusive,
                },
            )),
        }
    }
}

impl fmt::Display for KernelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Build an assignment kernel from `src` to `dst` and instantiate it at
/// `offset` in one step. Returns the number of slots written.
#[allow(clippy::too_many_arguments)]
pub fn make_assignment_kernel(
    kb: &mut KernelBuffer,
    offset: usize,
    dst: &Type,
    dst_meta: Option<&OperandMeta>,
    src: &Type,
    src_meta: Option<&OperandMeta>,
    proto: &str,
    request: &str,
) -> Result<usize, Diagnostic> {
    let request = KernelRequest::parse(request)?;
    if FuncProto::parse(proto)? == FuncProto::BinaryPredicate {
        return Err(Diagnostic::error(
            ErrorCode::InvalidFunctionPrototype,
            "assignment kernels are 'unary' or 'expr'".to_string(),
        ));
    }
    let desc = KernelDescriptor::from_assignment(dst, src, proto, "default")?;
    desc.instantiate(kb, offset, dst_meta, &[src_meta], request)
}

pub(crate) fn meta_at<'m>(src_meta: &[Option<&'m OperandMeta>], i: usize) -> Option<&'m OperandMeta> {
    src_meta.get(i).copied().flatten()
}

fn check_destination(ty: &Type) -> Result<(), Diagnostic> {
    if ty.metadata_size() > 0 {
        return Err(Diagnostic::error(
            ErrorCode::MetadataMismatch,
            format!("destination `{}` needs out-of-line storage, which kernels cannot allocate", ty),
        ));
    }
    Ok(())
}

/// Dry-run the assignment lowering so bad pairs fail at construction.
fn check_assignable(dst: &Type, src: &Type, mode: ErrorMode) -> Result<(), Diagnostic> {
    let mut scratch = KernelBuffer::new();
    emit_assign(&mut scratch, 0, dst, src, Some(&OperandMeta::contiguous()), mode).map(|_| ())
}

fn resolve_property(ty: &Type, name: &str) -> Result<(usize, Type), Diagnostic> {
    if let Some((offset, field)) = ty.field(name) {
        return Ok((offset, field.clone()));
    }
    if let Type::Scalar(ScalarKind::Complex, width) = ty {
        let component = Type::float(width / 2);
        match name {
            "real" => return Ok((0, component)),
            "imag" => return Ok(((width / 16) as usize, component)),
            _ => {}
        }
    }
    Err(Diagnostic::error(
        ErrorCode::TypeMismatch,
        format!("`{}` has no property '{}'", ty, name),
    ))
}
