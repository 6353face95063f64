//! Instantiated kernels: a flat buffer of steps.
//!
//! A descriptor lowers itself into consecutive step slots. Steps that wrap a
//! child (loops, offsets, the strided adapter) expect it in the next slot;
//! steps with several children record their slot indices.

use std::fmt;
use std::sync::Arc;

use super::exec::{self, Src};
use super::primitive::PrimitiveOp;
use super::ScalarFn;
use crate::array::ErrorMode;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::foreign::InnerLoop;
use crate::types::{ScalarKind, Type};

/// Loops at least this long run on the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 32 * 1024;

/// Layout of an operand that the type alone does not pin down: byte strides
/// for its leading dimensions, outermost first. Missing entries fall back to
/// contiguous strides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperandMeta {
    pub strides: Vec<isize>,
}

impl OperandMeta {
    pub fn contiguous() -> Self {
        Self::default()
    }

    pub fn with_strides(strides: Vec<isize>) -> Self {
        Self { strides }
    }

    /// Meta for the element after peeling `count` leading dimensions.
    pub(crate) fn inner(&self, count: usize) -> OperandMeta {
        OperandMeta {
            strides: self.strides.iter().skip(count).copied().collect(),
        }
    }

    pub(crate) fn stride_or(&self, dim: usize, contiguous: isize) -> isize {
        self.strides.get(dim).copied().unwrap_or(contiguous)
    }
}

/// How a loop advances one source operand along its dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DimAccess {
    /// Fixed stride; zero broadcasts.
    Strided(isize),
    /// The operand holds a ragged slot; its length must match the loop or be 1.
    Var { stride: isize },
}

#[derive(Clone, Debug)]
pub(crate) struct LoopStep {
    pub(crate) size: usize,
    pub(crate) dst_stride: isize,
    pub(crate) srcs: Vec<DimAccess>,
    /// Destination bytes written per iteration.
    pub(crate) elem_size: usize,
    pub(crate) parallel: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct FieldStep {
    pub(crate) dst_offset: usize,
    pub(crate) src_offset: usize,
    pub(crate) child: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct ReduceDim {
    pub(crate) size: usize,
    pub(crate) src_stride: isize,
    pub(crate) dst_stride: isize,
    pub(crate) reduced: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ReduceStep {
    pub(crate) dims: Vec<ReduceDim>,
    pub(crate) acc_size: usize,
    /// Identity, already encoded as the accumulator type.
    pub(crate) identity: Option<Vec<u8>>,
    /// `elem -> acc`, seeds the accumulator from the first element.
    pub(crate) init: usize,
    /// `(acc, elem) -> acc`.
    pub(crate) fold: usize,
    pub(crate) reverse: bool,
    /// Partials of one slice may be computed in chunks and folded in order.
    pub(crate) split: bool,
    pub(crate) parallel: bool,
    pub(crate) threshold: usize,
}

#[derive(Clone)]
pub(crate) enum ScalarOp {
    Primitive(PrimitiveOp),
    Closure(ScalarFn),
}

#[derive(Clone)]
pub(crate) struct ForeignFn {
    pub(crate) name: String,
    pub(crate) inner: Arc<dyn InnerLoop>,
}

impl fmt::Debug for ForeignFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignFn({})", self.name)
    }
}

impl fmt::Debug for ScalarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarOp::Primitive(op) => write!(f, "Primitive({})", op.name()),
            ScalarOp::Closure(func) => write!(f, "Closure({})", func.name()),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// A slot reserved but never filled.
    Vacant,
    /// Adapter for strided requests; the child follows.
    Strided,
    Copy {
        size: usize,
    },
    Convert {
        dst: (ScalarKind, u32),
        src: (ScalarKind, u32),
        mode: ErrorMode,
    },
    /// One dimension of iteration; the child follows.
    Loop(LoopStep),
    Fields(Vec<FieldStep>),
    /// Shift each source by a byte offset; the child follows.
    Offset(Vec<usize>),
    /// Compare two values of `ty`. Each side is either read directly or
    /// produced by a child kernel.
    Predicate {
        ty: Type,
        lhs: Option<usize>,
        rhs: Option<usize>,
    },
    Scalar {
        op: ScalarOp,
        dst: Type,
        srcs: Vec<Type>,
    },
    Foreign {
        func: ForeignFn,
        dst_size: usize,
        src_sizes: Vec<usize>,
        exclusive: bool,
    },
    Reduce(ReduceStep),
}

impl Step {
    fn label(&self) -> String {
        match self {
            Step::Vacant => "vacant".to_string(),
            Step::Strided => "strided".to_string(),
            Step::Copy { size } => format!("copy {}B", size),
            Step::Convert { dst, src, mode } => format!(
                "convert {} <- {} ({})",
                Type::Scalar(dst.0, dst.1),
                Type::Scalar(src.0, src.1),
                mode.name()
            ),
            Step::Loop(l) => format!(
                "loop x{} dst+{} srcs{:?}{}",
                l.size,
                l.dst_stride,
                l.srcs,
                if l.parallel { " parallel" } else { "" }
            ),
            Step::Fields(fields) => format!("fields x{}", fields.len()),
            Step::Offset(offsets) => format!("offset {:?}", offsets),
            Step::Predicate { ty, .. } => format!("equal? {}", ty),
            Step::Scalar { op, dst, .. } => format!("{:?} -> {}", op, dst),
            Step::Foreign { func, exclusive, .. } => format!(
                "foreign {}{}",
                func.name,
                if *exclusive { " exclusive" } else { "" }
            ),
            Step::Reduce(r) => format!(
                "reduce dims {} acc {}B{}",
                r.dims.len(),
                r.acc_size,
                if r.reverse { " reverse" } else { "" }
            ),
        }
    }
}

/// A growable buffer of instantiated steps. Several kernels may share one
/// buffer at different offsets.
#[derive(Debug)]
pub struct KernelBuffer {
    steps: Vec<Step>,
    parallel_threshold: usize,
    /// Slots overwritten by the instantiation in progress, with their
    /// previous contents.
    journal: Option<Vec<(usize, Step)>>,
}

impl Default for KernelBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuffer {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            journal: None,
        }
    }

    pub fn with_parallel_threshold(threshold: usize) -> Self {
        Self {
            steps: Vec::new(),
            parallel_threshold: threshold.max(1),
            journal: None,
        }
    }

    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.steps.truncate(len);
    }

    /// Start recording overwritten slots. Returns the current length.
    pub(crate) fn begin(&mut self) -> usize {
        self.journal = Some(Vec::new());
        self.steps.len()
    }

    /// Keep everything written since [`begin`](Self::begin).
    pub(crate) fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo everything written since [`begin`](Self::begin): drop slots
    /// that grew past `mark` and restore the ones overwritten below it.
    /// Slots the failed call never wrote are left alone.
    pub(crate) fn rollback(&mut self, mark: usize) {
        self.steps.truncate(mark);
        let journal = self.journal.take().unwrap_or_default();
        for (at, step) in journal.into_iter().rev() {
            if at < mark {
                self.steps[at] = step;
            }
        }
    }

    /// Write `step` at slot `at`, growing the buffer as needed. Returns the
    /// next free slot.
    pub(crate) fn put(&mut self, at: usize, step: Step) -> usize {
        if at >= self.steps.len() {
            self.steps.resize(at + 1, Step::Vacant);
        } else if let Some(journal) = &mut self.journal {
            journal.push((at, self.steps[at].clone()));
        }
        self.steps[at] = step;
        at + 1
    }

    /// The kernel rooted at slot `root`.
    pub fn kernel(&self, root: usize) -> Result<Kernel<'_>, Diagnostic> {
        match self.steps.get(root) {
            None | Some(Step::Vacant) => Err(Diagnostic::error(
                ErrorCode::IndexOutOfBounds,
                format!("no kernel instantiated at slot {}", root),
            )),
            Some(_) => Ok(Kernel {
                steps: &self.steps,
                root,
            }),
        }
    }

    /// One line per slot, for debugging and snapshot tests.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{:>3}: {}\n", i, step.label()));
        }
        out
    }
}

/// A callable view of an instantiated kernel.
#[derive(Clone, Copy, Debug)]
pub struct Kernel<'a> {
    steps: &'a [Step],
    root: usize,
}

impl Kernel<'_> {
    pub fn is_strided(&self) -> bool {
        matches!(self.steps[self.root], Step::Strided)
    }

    /// Compute one element: `dst` and each source start at offset 0.
    pub fn call(&self, dst: &mut [u8], srcs: &[&[u8]]) -> Result<(), Diagnostic> {
        let srcs: Vec<(&[u8], usize)> = srcs.iter().map(|s| (*s, 0)).collect();
        self.call_at(dst, 0, &srcs)
    }

    /// Compute one element with explicit byte offsets.
    pub fn call_at(&self, dst: &mut [u8], dst_at: usize, srcs: &[(&[u8], usize)]) -> Result<(), Diagnostic> {
        if self.is_strided() {
            return Err(request_mismatch("single", "strided"));
        }
        let srcs: Vec<Src<'_>> = srcs.iter().map(|&(bytes, at)| Src { bytes, at }).collect();
        exec::run(self.steps, self.root, dst, dst_at, &srcs)
    }

    /// Compute `count` elements. Element `i` reads each source at
    /// `offset + i * stride` and writes `dst_at + i * dst_stride`.
    pub fn call_strided(
        &self,
        dst: &mut [u8],
        dst_at: usize,
        dst_stride: isize,
        srcs: &[(&[u8], usize, isize)],
        count: usize,
    ) -> Result<(), Diagnostic> {
        if !self.is_strided() {
            return Err(request_mismatch("strided", "single"));
        }
        for i in 0..count {
            let dst_i = exec::advance(dst_at, dst_stride, i)?;
            let srcs_i = srcs
                .iter()
                .map(|&(bytes, at, stride)| Ok(Src { bytes, at: exec::advance(at, stride, i)? }))
                .collect::<Result<Vec<_>, Diagnostic>>()?;
            exec::run(self.steps, self.root + 1, dst, dst_i, &srcs_i)?;
        }
        Ok(())
    }
}

fn request_mismatch(called: &str, built: &str) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidKernelRequestType,
        format!("kernel was instantiated for {} requests but called as {}", built, called),
    )
}
