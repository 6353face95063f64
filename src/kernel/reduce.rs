//! Lifting a binary kernel into a reduction over chosen axes.

use std::sync::Arc;

use super::assign::emit_assign;
use super::buffer::{KernelBuffer, OperandMeta, ReduceDim, ReduceStep, Step};
use super::{check_assignable, check_destination, DescriptorKind, FuncProto, KernelDescriptor, Signature};
use crate::array::layout::{contiguous_strides, write_value};
use crate::array::ErrorMode;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{Dim, Type};
use crate::value::Value;

/// How to reduce. The associativity and commutativity flags are trusted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReductionSpec {
    /// Axes to reduce, negative counting from the innermost reduction
    /// dimension. `None` reduces every axis.
    pub axis: Option<Vec<isize>>,
    /// Keep reduced axes in the output with size 1.
    pub keepdims: bool,
    /// Slices may be split into chunks whose partials are folded in order.
    pub associative: bool,
    pub commutative: bool,
    /// Fold from the last element to the first.
    pub right_associative: bool,
    pub identity: Option<Value>,
}

/// A set of resolved reduction axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AxisSet(u64);

impl AxisSet {
    pub const MAX_DIMS: usize = 64;

    pub fn resolve(axis: Option<&[isize]>, ndim: usize) -> Result<AxisSet, Diagnostic> {
        if ndim > Self::MAX_DIMS {
            return Err(Diagnostic::error(
                ErrorCode::AxisOutOfBounds,
                format!(
                    "{} reduction dimensions exceed the limit of {}",
                    ndim,
                    Self::MAX_DIMS
                ),
            ));
        }
        let Some(axis) = axis else {
            return Ok(AxisSet(if ndim == 64 { u64::MAX } else { (1u64 << ndim) - 1 }));
        };
        let n = ndim as isize;
        let mut bits = 0u64;
        for &a in axis {
            let resolved = if a < 0 { a + n } else { a };
            if resolved < 0 || resolved >= n {
                return Err(Diagnostic::error(
                    ErrorCode::AxisOutOfBounds,
                    format!("axis {} is out of bounds for {} reduction dimensions", a, ndim),
                ));
            }
            bits |= 1u64 << resolved;
        }
        Ok(AxisSet(bits))
    }

    pub fn contains(self, dim: usize) -> bool {
        dim < Self::MAX_DIMS && self.0 & (1u64 << dim) != 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub(crate) struct ReductionPlan {
    input: Type,
    acc: Type,
    elem: Type,
    ndim: usize,
    axes: AxisSet,
    keepdims: bool,
    reverse: bool,
    split: bool,
    commutative: bool,
    identity: Option<(Value, Vec<u8>)>,
    elwise: KernelDescriptor,
    init: Option<KernelDescriptor>,
}

impl ReductionPlan {
    pub(crate) fn describe(&self) -> String {
        let mut flags = String::new();
        if self.keepdims {
            flags.push_str(" keepdims");
        }
        if self.reverse {
            flags.push_str(" right");
        }
        if self.split {
            flags.push_str(" associative");
        }
        if self.commutative {
            flags.push_str(" commutative");
        }
        if let Some((value, _)) = &self.identity {
            flags.push_str(&format!(" identity={}", value));
        }
        let init = match &self.init {
            Some(d) => format!(" init {{{}}}", d.describe()),
            None => String::new(),
        };
        format!(
            "reduction axes={:#b}{} of {} {{{}}}{}",
            self.axes.bits(),
            flags,
            self.input,
            self.elwise.describe(),
            init
        )
    }
}

/// Turn `elwise: (acc, elem) -> acc` into a reduction over the leading
/// dimensions of `lifted_type`, which must end with `elem`.
///
/// Without an identity the accumulator is seeded from the first element of
/// each slice, through `dst_initialization: elem -> acc` when given. With an
/// identity every element is folded and `dst_initialization` is only
/// checked against the signature, never run.
pub fn lift_reduction(
    elwise: &KernelDescriptor,
    lifted_type: &Type,
    dst_initialization: Option<&KernelDescriptor>,
    spec: &ReductionSpec,
) -> Result<KernelDescriptor, Diagnostic> {
    let sig = elwise.signature();
    if sig.arity() != 2 || elwise.proto() == FuncProto::Unary {
        return Err(Diagnostic::error(
            ErrorCode::InvalidFunctionPrototype,
            format!("a reduction needs (accumulator, element) -> accumulator, got {}", sig),
        ));
    }
    let acc = &sig.ret;
    let elem = &sig.params[1];
    if sig.params[0] != *acc {
        return Err(Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("accumulator operand `{}` differs from the result `{}`", sig.params[0], acc),
        ));
    }
    check_destination(acc)?;

    let ndim = lifted_type
        .ndim()
        .checked_sub(elem.ndim())
        .filter(|&n| lifted_type.strip_dims(n) == Some(elem))
        .ok_or_else(|| {
            Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("`{}` does not end with the element type `{}`", lifted_type, elem),
            )
        })?;
    let mut sizes = Vec::with_capacity(ndim);
    for dim in lifted_type.dims().iter().take(ndim) {
        match dim {
            Dim::Fixed(n) => sizes.push(*n),
            Dim::Var => {
                return Err(Diagnostic::error(
                    ErrorCode::ShapeMismatch,
                    format!("reduction dimensions of `{}` must be fixed", lifted_type),
                ))
            }
        }
    }
    let axes = AxisSet::resolve(spec.axis.as_deref(), ndim)?;

    let identity = match &spec.identity {
        Some(value) => {
            let mut bytes = vec![0u8; acc.data_size()];
            write_value(&mut bytes, 0, acc, value, ErrorMode::default())?;
            Some((value.clone(), bytes))
        }
        None => None,
    };
    // an empty reduced dimension only matters when some output slice exists
    let slices: usize = (0..ndim).filter(|&k| !axes.contains(k)).map(|k| sizes[k]).product();
    if identity.is_none() && slices > 0 && (0..ndim).any(|k| axes.contains(k) && sizes[k] == 0) {
        return Err(Diagnostic::error(
            ErrorCode::EmptyReductionNoIdentity,
            format!("`{}` has an empty reduced dimension and no identity was given", lifted_type),
        ));
    }

    match dst_initialization {
        Some(init) => {
            let init_sig = init.signature();
            if init_sig.params.as_slice() != std::slice::from_ref(elem) || init_sig.ret != *acc {
                return Err(Diagnostic::error(
                    ErrorCode::TypeMismatch,
                    format!("initializer must be ({}) -> {}, got {}", elem, acc, init_sig),
                ));
            }
        }
        None => check_assignable(acc, elem, ErrorMode::default())?,
    }

    let out_dims: Vec<Dim> = sizes
        .iter()
        .enumerate()
        .filter_map(|(k, &n)| match (axes.contains(k), spec.keepdims) {
            (false, _) => Some(Dim::Fixed(n)),
            (true, true) => Some(Dim::Fixed(1)),
            (true, false) => None,
        })
        .collect();
    let out = Type::with_dims(&out_dims, acc.clone());
    let needs_exclusive = elwise.needs_exclusive() || dst_initialization.is_some_and(KernelDescriptor::needs_exclusive);

    let plan = ReductionPlan {
        input: lifted_type.clone(),
        acc: acc.clone(),
        elem: elem.clone(),
        ndim,
        axes,
        keepdims: spec.keepdims,
        reverse: spec.right_associative,
        split: spec.associative && acc == elem,
        commutative: spec.commutative,
        identity,
        elwise: elwise.clone(),
        init: dst_initialization.cloned(),
    };
    Ok(KernelDescriptor::from_parts(
        Signature::new(vec![lifted_type.clone()], out),
        FuncProto::Unary,
        needs_exclusive,
        DescriptorKind::Reduction(Arc::new(plan)),
    ))
}

/// Emit the reduce step at `at`, followed by its init and fold children.
pub(crate) fn emit(
    plan: &ReductionPlan,
    parallel: bool,
    kb: &mut KernelBuffer,
    at: usize,
    src_meta: Option<&OperandMeta>,
) -> Result<usize, Diagnostic> {
    let src_contiguous = contiguous_strides(&plan.input, plan.ndim);
    let sizes: Vec<usize> = plan
        .input
        .dims()
        .iter()
        .take(plan.ndim)
        .map(|d| match d {
            Dim::Fixed(n) => *n,
            Dim::Var => 0,
        })
        .collect();

    // output strides: reduced axes either vanish or stay with size 1
    let acc_size = plan.acc.data_size() as isize;
    let mut dst_strides = vec![0isize; plan.ndim];
    let mut stride = acc_size;
    for k in (0..plan.ndim).rev() {
        if !plan.axes.contains(k) {
            dst_strides[k] = stride;
            stride *= sizes[k] as isize;
        }
    }

    let dims = (0..plan.ndim)
        .map(|k| ReduceDim {
            size: sizes[k],
            src_stride: src_meta.map_or(src_contiguous[k], |m| m.stride_or(k, src_contiguous[k])),
            dst_stride: dst_strides[k],
            reduced: plan.axes.contains(k),
        })
        .collect();

    let contiguous = OperandMeta::contiguous();
    let init = kb.put(at, Step::Vacant);
    let fold = match &plan.init {
        Some(d) => d.emit(kb, init, None, &[Some(&contiguous)])?,
        None => emit_assign(kb, init, &plan.acc, &plan.elem, Some(&contiguous), ErrorMode::default())?,
    };
    let end = plan
        .elwise
        .emit(kb, fold, None, &[Some(&contiguous), Some(&contiguous)])?;

    let threshold = kb.parallel_threshold();
    kb.put(
        at,
        Step::Reduce(ReduceStep {
            dims,
            acc_size: plan.acc.data_size(),
            identity: plan.identity.as_ref().map(|(_, bytes)| bytes.clone()),
            init,
            fold,
            reverse: plan.reverse,
            split: plan.split,
            parallel,
            threshold,
        }),
    );
    Ok(end)
}
