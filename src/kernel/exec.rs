//! The step interpreter.

use rayon::prelude::*;

use super::buffer::{DimAccess, LoopStep, ReduceStep, ScalarOp, Step};
use crate::array::layout::{read_value, write_value};
use crate::array::scalar::{read_scalar, read_slot, write_scalar};
use crate::array::ErrorMode;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::foreign;
use crate::types::Type;
use crate::value::Value;

/// A source operand: its whole buffer and the offset of the current element.
/// Ragged slots hold absolute offsets, so the buffer is never sliced.
#[derive(Clone, Copy)]
pub(crate) struct Src<'b> {
    pub(crate) bytes: &'b [u8],
    pub(crate) at: usize,
}

pub(crate) fn advance(at: usize, stride: isize, i: usize) -> Result<usize, Diagnostic> {
    let pos = at as isize + stride * i as isize;
    if pos < 0 {
        return Err(Diagnostic::error(
            ErrorCode::IndexOutOfBounds,
            format!("stride {} moves element {} before the start of its buffer", stride, i),
        ));
    }
    Ok(pos as usize)
}

pub(crate) fn run(
    steps: &[Step],
    idx: usize,
    dst: &mut [u8],
    dst_at: usize,
    srcs: &[Src<'_>],
) -> Result<(), Diagnostic> {
    match &steps[idx] {
        Step::Vacant => Err(Diagnostic::error(
            ErrorCode::IndexOutOfBounds,
            format!("kernel slot {} was never filled", idx),
        )),
        Step::Strided => run(steps, idx + 1, dst, dst_at, srcs),
        Step::Copy { size } => {
            let src = operand(srcs, 0)?;
            let input = src
                .bytes
                .get(src.at..src.at + size)
                .ok_or_else(|| overrun(src.at, *size, src.bytes.len()))?;
            let len = dst.len();
            let out = dst
                .get_mut(dst_at..dst_at + size)
                .ok_or_else(|| overrun(dst_at, *size, len))?;
            out.copy_from_slice(input);
            Ok(())
        }
        Step::Convert { dst: to, src: from, mode } => {
            let src = operand(srcs, 0)?;
            let value = read_scalar(src.bytes, src.at, from.0, from.1)?;
            write_scalar(dst, dst_at, to.0, to.1, &value, *mode)
        }
        Step::Loop(l) => run_loop(steps, idx, l, dst, dst_at, srcs),
        Step::Fields(fields) => {
            let src = operand(srcs, 0)?;
            for field in fields {
                let shifted = [Src {
                    bytes: src.bytes,
                    at: src.at + field.src_offset,
                }];
                run(steps, field.child, dst, dst_at + field.dst_offset, &shifted)?;
            }
            Ok(())
        }
        Step::Offset(offsets) => {
            let shifted: Vec<Src<'_>> = srcs
                .iter()
                .enumerate()
                .map(|(i, s)| Src {
                    bytes: s.bytes,
                    at: s.at + offsets.get(i).copied().unwrap_or(0),
                })
                .collect();
            run(steps, idx + 1, dst, dst_at, &shifted)
        }
        Step::Predicate { ty, lhs, rhs } => {
            let a = predicate_side(steps, *lhs, ty, operand(srcs, 0)?)?;
            let b = predicate_side(steps, *rhs, ty, operand(srcs, 1)?)?;
            let len = dst.len();
            let out = dst.get_mut(dst_at).ok_or_else(|| overrun(dst_at, 1, len))?;
            *out = (a == b) as u8;
            Ok(())
        }
        Step::Scalar { op, dst: dst_ty, srcs: src_tys } => {
            let args = src_tys
                .iter()
                .enumerate()
                .map(|(i, ty)| {
                    let s = operand(srcs, i)?;
                    read_value(s.bytes, s.at, ty)
                })
                .collect::<Result<Vec<Value>, Diagnostic>>()?;
            let out = match op {
                ScalarOp::Primitive(p) => p.eval(&args)?,
                ScalarOp::Closure(f) => f.call(&args)?,
            };
            write_value(dst, dst_at, dst_ty, &out, ErrorMode::None)
        }
        Step::Foreign {
            func,
            dst_size,
            src_sizes,
            exclusive,
        } => {
            let inputs = src_sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| {
                    let s = operand(srcs, i)?;
                    s.bytes
                        .get(s.at..s.at + n)
                        .ok_or_else(|| overrun(s.at, n, s.bytes.len()))
                })
                .collect::<Result<Vec<&[u8]>, Diagnostic>>()?;
            let len = dst.len();
            let out = dst
                .get_mut(dst_at..dst_at + dst_size)
                .ok_or_else(|| overrun(dst_at, *dst_size, len))?;
            let _guard = exclusive.then(foreign::exclusive_lock);
            func.inner.call(&inputs, out).map_err(|msg| {
                Diagnostic::error(
                    ErrorCode::ForeignCallFailed,
                    format!("foreign function `{}` failed: {}", func.name, msg),
                )
            })
        }
        Step::Reduce(r) => run_reduce(steps, r, dst, dst_at, operand(srcs, 0)?),
    }
}

fn predicate_side(
    steps: &[Step],
    child: Option<usize>,
    ty: &Type,
    src: Src<'_>,
) -> Result<Value, Diagnostic> {
    match child {
        Some(c) => {
            let mut tmp = vec![0u8; ty.data_size()];
            run(steps, c, &mut tmp, 0, &[src])?;
            read_value(&tmp, 0, ty)
        }
        None => read_value(src.bytes, src.at, ty),
    }
}

/// Start offset and per-iteration stride of each source for one loop.
fn resolve_sources(l: &LoopStep, srcs: &[Src<'_>]) -> Result<Vec<(usize, isize)>, Diagnostic> {
    l.srcs
        .iter()
        .enumerate()
        .map(|(i, access)| {
            let s = operand(srcs, i)?;
            match *access {
                DimAccess::Strided(stride) => Ok((s.at, stride)),
                DimAccess::Var { stride } => {
                    let (offset, len) = read_slot(s.bytes, s.at)?;
                    if len == l.size {
                        Ok((offset, stride))
                    } else if len == 1 {
                        Ok((offset, 0))
                    } else {
                        Err(Diagnostic::error(
                            ErrorCode::ShapeMismatch,
                            format!(
                                "ragged dimension of length {} cannot broadcast to {}",
                                len, l.size
                            ),
                        )
                        .with_note(format!("operand {}", i)))
                    }
                }
            }
        })
        .collect()
}

fn sources_at<'b>(srcs: &[Src<'b>], starts: &[(usize, isize)], i: usize) -> Result<Vec<Src<'b>>, Diagnostic> {
    srcs.iter()
        .zip(starts)
        .map(|(s, &(at, stride))| {
            Ok(Src {
                bytes: s.bytes,
                at: advance(at, stride, i)?,
            })
        })
        .collect()
}

fn run_loop(
    steps: &[Step],
    idx: usize,
    l: &LoopStep,
    dst: &mut [u8],
    dst_at: usize,
    srcs: &[Src<'_>],
) -> Result<(), Diagnostic> {
    let starts = resolve_sources(l, srcs)?;
    let child = idx + 1;

    if l.parallel && l.size > 1 {
        // each iteration writes a private element; results are copied back in order
        let parts = (0..l.size)
            .into_par_iter()
            .map(|i| {
                let srcs_i = sources_at(srcs, &starts, i)?;
                let mut tmp = vec![0u8; l.elem_size];
                run(steps, child, &mut tmp, 0, &srcs_i)?;
                Ok(tmp)
            })
            .collect::<Result<Vec<Vec<u8>>, Diagnostic>>()?;
        for (i, part) in parts.iter().enumerate() {
            let at = advance(dst_at, l.dst_stride, i)?;
            let len = dst.len();
            dst.get_mut(at..at + part.len())
                .ok_or_else(|| overrun(at, part.len(), len))?
                .copy_from_slice(part);
        }
        return Ok(());
    }

    for i in 0..l.size {
        let srcs_i = sources_at(srcs, &starts, i)?;
        run(steps, child, dst, advance(dst_at, l.dst_stride, i)?, &srcs_i)?;
    }
    Ok(())
}

/// Source offsets of a reduced slice, in traversal order.
fn slice_offsets(r: &ReduceStep, base: usize) -> Result<Vec<usize>, Diagnostic> {
    let reduced: Vec<_> = r.dims.iter().filter(|d| d.reduced).collect();
    let count: usize = reduced.iter().map(|d| d.size).product();
    let mut offsets = Vec::with_capacity(count);
    for linear in 0..count {
        let mut rem = linear;
        let mut at = base as isize;
        for dim in reduced.iter().rev() {
            at += (rem % dim.size) as isize * dim.src_stride;
            rem /= dim.size;
        }
        if at < 0 {
            return Err(overrun(0, 0, 0));
        }
        offsets.push(at as usize);
    }
    if r.reverse {
        offsets.reverse();
    }
    Ok(offsets)
}

/// Fold the elements at `offsets` into an accumulator. `seed` starts the
/// fold; without one the first element is converted by the init child.
fn fold_range(
    steps: &[Step],
    r: &ReduceStep,
    src: &[u8],
    offsets: &[usize],
    seed: Option<Vec<u8>>,
) -> Result<Option<Vec<u8>>, Diagnostic> {
    let (mut acc, rest) = match seed {
        Some(acc) => (acc, offsets),
        None => {
            let Some((&first, rest)) = offsets.split_first() else {
                return Ok(None);
            };
            let mut acc = vec![0u8; r.acc_size];
            run(steps, r.init, &mut acc, 0, &[Src { bytes: src, at: first }])?;
            (acc, rest)
        }
    };
    let mut next = vec![0u8; r.acc_size];
    for &at in rest {
        run(
            steps,
            r.fold,
            &mut next,
            0,
            &[Src { bytes: &acc, at: 0 }, Src { bytes: src, at }],
        )?;
        std::mem::swap(&mut acc, &mut next);
    }
    Ok(Some(acc))
}

fn reduce_slice(steps: &[Step], r: &ReduceStep, src: &[u8], base: usize) -> Result<Vec<u8>, Diagnostic> {
    let offsets = slice_offsets(r, base)?;
    let seed = r.identity.clone();

    let acc = if r.split && r.parallel && offsets.len() >= r.threshold {
        let chunk = r.threshold.max(1);
        let partials = offsets
            .par_chunks(chunk)
            .enumerate()
            .map(|(i, part)| fold_range(steps, r, src, part, if i == 0 { seed.clone() } else { None }))
            .collect::<Result<Vec<_>, Diagnostic>>()?;
        let mut partials = partials.into_iter().flatten();
        match partials.next() {
            Some(mut acc) => {
                // partials share the element type, so they fold like elements
                let mut next = vec![0u8; r.acc_size];
                for part in partials {
                    run(
                        steps,
                        r.fold,
                        &mut next,
                        0,
                        &[Src { bytes: &acc, at: 0 }, Src { bytes: &part, at: 0 }],
                    )?;
                    std::mem::swap(&mut acc, &mut next);
                }
                Some(acc)
            }
            None => None,
        }
    } else {
        fold_range(steps, r, src, &offsets, seed)?
    };

    acc.ok_or_else(|| {
        Diagnostic::error(
            ErrorCode::EmptyReductionNoIdentity,
            "cannot reduce an empty slice without an identity".to_string(),
        )
    })
}

fn run_reduce(steps: &[Step], r: &ReduceStep, dst: &mut [u8], dst_at: usize, src: Src<'_>) -> Result<(), Diagnostic> {
    let kept: Vec<_> = r.dims.iter().filter(|d| !d.reduced).collect();
    let outer: usize = kept.iter().map(|d| d.size).product();

    let position = |linear: usize| -> (isize, isize) {
        let mut rem = linear;
        let (mut s, mut d) = (src.at as isize, dst_at as isize);
        for dim in kept.iter().rev() {
            let i = (rem % dim.size) as isize;
            rem /= dim.size;
            s += i * dim.src_stride;
            d += i * dim.dst_stride;
        }
        (s, d)
    };

    let compute = |linear: usize| -> Result<(usize, Vec<u8>), Diagnostic> {
        let (s, d) = position(linear);
        if s < 0 || d < 0 {
            return Err(overrun(0, 0, 0));
        }
        Ok((d as usize, reduce_slice(steps, r, src.bytes, s as usize)?))
    };

    let results = if r.parallel && outer >= r.threshold {
        (0..outer)
            .into_par_iter()
            .map(compute)
            .collect::<Result<Vec<_>, Diagnostic>>()?
    } else {
        (0..outer).map(compute).collect::<Result<Vec<_>, Diagnostic>>()?
    };

    for (at, acc) in results {
        let len = dst.len();
        dst.get_mut(at..at + acc.len())
            .ok_or_else(|| overrun(at, acc.len(), len))?
            .copy_from_slice(&acc);
    }
    Ok(())
}

fn operand<'b>(srcs: &[Src<'b>], i: usize) -> Result<Src<'b>, Diagnostic> {
    srcs.get(i).copied().ok_or_else(|| {
        Diagnostic::error(
            ErrorCode::TypeMismatch,
            format!("kernel expects operand {} but only {} were given", i, srcs.len()),
        )
    })
}

fn overrun(at: usize, n: usize, len: usize) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::IndexOutOfBounds,
        format!("access of {} bytes at offset {} overruns a buffer of {} bytes", n, at, len),
    )
}
