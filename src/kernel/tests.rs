use super::buffer::Step;
use super::*;
use crate::array::Array;
use crate::diagnostic::ErrorCode;
use crate::syntax::{parse_type, parse_value};
use crate::value::Value;

fn ty(source: &str) -> Type {
    parse_type(source).unwrap()
}

fn lit(source: &str) -> Value {
    parse_value(source).unwrap()
}

fn arr(t: &str, v: &str) -> Array {
    Array::from_value(&ty(t), &lit(v), ErrorMode::default()).unwrap()
}

fn int_range(n: i64) -> Array {
    let values = Value::List((0..n).map(Value::Int).collect());
    Array::from_value(&Type::fixed(Type::int(64), n as usize), &values, ErrorMode::default()).unwrap()
}

fn add(t: &str) -> KernelDescriptor {
    KernelDescriptor::primitive(PrimitiveOp::Add, &ty(t)).unwrap()
}

fn reduce(elwise: &KernelDescriptor, input: &str, spec: ReductionSpec) -> Result<KernelDescriptor, Diagnostic> {
    lift_reduction(elwise, &ty(input), None, &spec)
}

fn axes(axis: &[isize]) -> ReductionSpec {
    ReductionSpec {
        axis: Some(axis.to_vec()),
        ..ReductionSpec::default()
    }
}

// --- construction ---

#[test]
fn test_assignment_converts() {
    let desc = KernelDescriptor::from_assignment(&ty("float64"), &ty("int32"), "unary", "default").unwrap();
    assert_eq!(desc.signature().to_string(), "(int32) -> float64");
    assert_eq!(desc.proto(), FuncProto::Unary);
    let out = apply(&desc, &[&arr("int32", "7")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Float(7.0));
}

#[test]
fn test_assignment_error_mode_applies_at_call() {
    let desc = KernelDescriptor::from_assignment(&ty("int8"), &ty("int32"), "expr", "overflow").unwrap();
    let err = apply(&desc, &[&arr("int32", "300")]).unwrap_err();
    assert!(err.is(ErrorCode::ConversionError));

    let wrapping = KernelDescriptor::from_assignment(&ty("int8"), &ty("int32"), "expr", "none").unwrap();
    let out = apply(&wrapping, &[&arr("int32", "300")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Int(44));
}

#[test]
fn test_invalid_names() {
    let err = KernelDescriptor::from_assignment(&ty("int32"), &ty("int32"), "ternary", "default").unwrap_err();
    assert!(err.is(ErrorCode::InvalidFunctionPrototype));
    let err = KernelDescriptor::from_assignment(&ty("int32"), &ty("int32"), "unary", "sloppy").unwrap_err();
    assert!(err.is(ErrorCode::InvalidErrorMode));

    let mut kb = KernelBuffer::new();
    let err = make_assignment_kernel(&mut kb, 0, &ty("int32"), None, &ty("int32"), None, "unary", "batched")
        .unwrap_err();
    assert!(err.is(ErrorCode::InvalidKernelRequestType));
    let err = make_assignment_kernel(
        &mut kb,
        0,
        &ty("int32"),
        None,
        &ty("int32"),
        None,
        "binary_predicate",
        "single",
    )
    .unwrap_err();
    assert!(err.is(ErrorCode::InvalidFunctionPrototype));
    assert!(kb.is_empty());
}

#[test]
fn test_string_destination_rejected() {
    let err = KernelDescriptor::from_assignment(&ty("string"), &ty("string"), "unary", "default").unwrap_err();
    assert!(err.is(ErrorCode::MetadataMismatch));
}

#[test]
fn test_missing_metadata_leaves_buffer_untouched() {
    let desc = KernelDescriptor::from_assignment(&ty("3 * int32"), &ty("var * int32"), "unary", "default").unwrap();
    let mut kb = KernelBuffer::new();
    let err = desc
        .instantiate(&mut kb, 0, None, &[None], KernelRequest::Single)
        .unwrap_err();
    assert!(err.is(ErrorCode::MetadataMismatch));
    assert_eq!(kb.len(), 0);

    let meta = OperandMeta::contiguous();
    let n = desc
        .instantiate(&mut kb, 0, None, &[Some(&meta)], KernelRequest::Single)
        .unwrap();
    assert_eq!(n, kb.len());
}

#[test]
fn test_incompatible_assignment() {
    let err = KernelDescriptor::from_assignment(&ty("int32"), &ty("3 * int32"), "unary", "default").unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
    let err = KernelDescriptor::from_assignment(&ty("3 * int32"), &ty("2 * int32"), "unary", "default").unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
}

#[test]
fn test_fingerprint_tracks_description() {
    let a = KernelDescriptor::from_assignment(&ty("float64"), &ty("int32"), "unary", "default").unwrap();
    let b = KernelDescriptor::from_assignment(&ty("float64"), &ty("int32"), "unary", "fractional").unwrap();
    let c = KernelDescriptor::from_assignment(&ty("float64"), &ty("int32"), "unary", "none").unwrap();
    assert_eq!(a.describe(), "assignment[fractional] unary (int32) -> float64");
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint());
    assert_eq!(a.short_fingerprint().len(), 16);
}

// --- single and strided requests ---

#[test]
fn test_strided_request() {
    let mut kb = KernelBuffer::new();
    let n = make_assignment_kernel(&mut kb, 0, &ty("int64"), None, &ty("int32"), None, "unary", "strided").unwrap();
    assert_eq!(n, 2);
    let kernel = kb.kernel(0).unwrap();
    assert!(kernel.is_strided());

    let src: &[u8] = bytemuck::cast_slice(&[1i32, 2, 3, 4]);
    let mut dst = vec![0u8; 32];
    kernel.call_strided(&mut dst, 0, 8, &[(src, 0, 4)], 4).unwrap();
    let out: Vec<i64> = dst.chunks(8).map(bytemuck::pod_read_unaligned).collect();
    assert_eq!(out, vec![1, 2, 3, 4]);

    // walk the source backwards
    kernel.call_strided(&mut dst, 0, 8, &[(src, 12, -4)], 4).unwrap();
    let out: Vec<i64> = dst.chunks(8).map(bytemuck::pod_read_unaligned).collect();
    assert_eq!(out, vec![4, 3, 2, 1]);

    let err = kernel.call(&mut dst, &[src]).unwrap_err();
    assert!(err.is(ErrorCode::InvalidKernelRequestType));
}

#[test]
fn test_single_kernel_rejects_strided_call() {
    let mut kb = KernelBuffer::new();
    make_assignment_kernel(&mut kb, 0, &ty("int64"), None, &ty("int32"), None, "expr", "single").unwrap();
    let kernel = kb.kernel(0).unwrap();
    let mut dst = vec![0u8; 8];
    let src: &[u8] = bytemuck::cast_slice(&[5i32]);
    let err = kernel.call_strided(&mut dst, 0, 8, &[(src, 0, 4)], 1).unwrap_err();
    assert!(err.is(ErrorCode::InvalidKernelRequestType));
    kernel.call(&mut dst, &[src]).unwrap();
    assert_eq!(bytemuck::pod_read_unaligned::<i64>(&dst), 5);
}

#[test]
fn test_kernels_share_a_buffer() {
    let mut kb = KernelBuffer::new();
    let first = make_assignment_kernel(&mut kb, 0, &ty("float64"), None, &ty("int32"), None, "unary", "single").unwrap();
    make_assignment_kernel(&mut kb, first, &ty("int16"), None, &ty("int32"), None, "unary", "single").unwrap();

    let src: &[u8] = bytemuck::cast_slice(&[9i32]);
    let mut wide = vec![0u8; 8];
    kb.kernel(0).unwrap().call(&mut wide, &[src]).unwrap();
    assert_eq!(bytemuck::pod_read_unaligned::<f64>(&wide), 9.0);
    let mut narrow = vec![0u8; 2];
    kb.kernel(first).unwrap().call(&mut narrow, &[src]).unwrap();
    assert_eq!(bytemuck::pod_read_unaligned::<i16>(&narrow), 9);

    assert!(kb.kernel(99).unwrap_err().is(ErrorCode::IndexOutOfBounds));
}

#[test]
fn test_failed_instantiation_keeps_later_kernels() {
    let mut kb = KernelBuffer::new();
    add("int32").instantiate(&mut kb, 5, None, &[], KernelRequest::Single).unwrap();
    let before = kb.dump();
    assert!(before.contains("add"));

    let ragged = KernelDescriptor::from_assignment(&ty("3 * int32"), &ty("var * int32"), "unary", "default").unwrap();
    let err = ragged.instantiate(&mut kb, 0, None, &[None], KernelRequest::Strided).unwrap_err();
    assert!(err.is(ErrorCode::MetadataMismatch));
    assert_eq!(kb.dump(), before);

    // an emit that fails after overwriting slot 1 and growing the buffer
    let mark = kb.begin();
    kb.put(0, Step::Strided);
    kb.put(1, Step::Copy { size: 4 });
    kb.put(8, Step::Copy { size: 4 });
    kb.rollback(mark);
    assert_eq!(kb.dump(), before);

    let src: &[u8] = bytemuck::cast_slice(&[2i32, 40]);
    let mut out = vec![0u8; 4];
    kb.kernel(5)
        .unwrap()
        .call(&mut out, &[&src[..4], &src[4..]])
        .unwrap();
    assert_eq!(bytemuck::pod_read_unaligned::<i32>(&out), 42);
}

// --- predicates and properties ---

#[test]
fn test_assignment_predicate() {
    let desc = KernelDescriptor::from_assignment(&ty("int32"), &ty("float64"), "binary_predicate", "none").unwrap();
    assert_eq!(desc.signature().to_string(), "(int32, float64) -> bool");
    let three = arr("int32", "3");
    let out = apply(&desc, &[&three, &arr("float64", "3.5")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Bool(true));
    let out = apply(&desc, &[&three, &arr("float64", "4.0")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Bool(false));

    let strict = KernelDescriptor::from_assignment(&ty("int32"), &ty("float64"), "binary_predicate", "default").unwrap();
    let err = apply(&strict, &[&three, &arr("float64", "3.5")]).unwrap_err();
    assert!(err.is(ErrorCode::ConversionError));
}

#[test]
fn test_struct_property() {
    let point = "{x: int32, y: float64}";
    let desc = KernelDescriptor::from_property(&ty(point), "y", "unary", "default").unwrap();
    assert_eq!(desc.signature().ret, Type::float(64));
    let out = apply(&desc, &[&arr(point, "{x: 1, y: 2.5}")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Float(2.5));

    let lifted = lift(&desc, &[ty("3 * float64"), ty(&format!("3 * {}", point))]).unwrap();
    let input = arr(
        &format!("3 * {}", point),
        "[{x: 1, y: 0.5}, {x: 2, y: 1.5}, {x: 3, y: 2.5}]",
    );
    let out = apply(&lifted, &[&input]).unwrap();
    assert_eq!(out.to_value().unwrap(), lit("[0.5, 1.5, 2.5]"));

    let err = KernelDescriptor::from_property(&ty(point), "z", "unary", "default").unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
}

#[test]
fn test_complex_components() {
    let real = KernelDescriptor::from_property(&ty("complex128"), "real", "unary", "default").unwrap();
    let imag = KernelDescriptor::from_property(&ty("complex128"), "imag", "unary", "default").unwrap();
    let z = arr("complex128", "1.5-2j");
    assert_eq!(apply(&real, &[&z]).unwrap().to_value().unwrap(), Value::Float(1.5));
    assert_eq!(apply(&imag, &[&z]).unwrap().to_value().unwrap(), Value::Float(-2.0));

    let imag32 = KernelDescriptor::from_property(&ty("complex64"), "imag", "unary", "default").unwrap();
    assert_eq!(imag32.signature().ret, Type::float(32));
    let z = arr("complex64", "0.5+4j");
    assert_eq!(apply(&imag32, &[&z]).unwrap().to_value().unwrap(), Value::Float(4.0));
}

#[test]
fn test_property_predicate() {
    let point = "{x: int32, y: float64}";
    let desc = KernelDescriptor::from_property(&ty(point), "x", "binary_predicate", "default").unwrap();
    assert_eq!(desc.signature().params.len(), 2);
    let a = arr(point, "{x: 1, y: 2.5}");
    let b = arr(point, "{x: 1, y: 9.0}");
    let c = arr(point, "{x: 2, y: 2.5}");
    assert_eq!(apply(&desc, &[&a, &b]).unwrap().to_value().unwrap(), Value::Bool(true));
    assert_eq!(apply(&desc, &[&a, &c]).unwrap().to_value().unwrap(), Value::Bool(false));
}

#[test]
fn test_primitive_predicates() {
    let less = KernelDescriptor::primitive(PrimitiveOp::Less, &ty("float64")).unwrap();
    assert_eq!(less.proto(), FuncProto::BinaryPredicate);
    let out = apply(&less, &[&arr("float64", "1.0"), &arr("float64", "2.0")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Bool(true));

    let err = KernelDescriptor::primitive(PrimitiveOp::Sqrt, &ty("int32")).unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
}

// --- lifting ---

#[test]
fn test_lift_over_fixed_dimension() {
    let child = KernelDescriptor::from_assignment(&ty("float64"), &ty("int32"), "unary", "default").unwrap();
    let lifted = lift(&child, &[ty("5 * float64"), ty("5 * int32")]).unwrap();
    assert_eq!(lifted.signature().to_string(), "(5 * int32) -> 5 * float64");
    let out = apply(&lifted, &[&arr("5 * int32", "[1, 2, 3, 4, 5]")]).unwrap();
    assert_eq!(out.to_value().unwrap(), lit("[1.0, 2.0, 3.0, 4.0, 5.0]"));
}

#[test]
fn test_lift_broadcasts_missing_and_unit_dims() {
    let lifted = lift(&add("int32"), &[ty("2 * 3 * int32"), ty("2 * 3 * int32"), ty("3 * int32")]).unwrap();
    let a = arr("2 * 3 * int32", "[[1, 2, 3], [4, 5, 6]]");
    let b = arr("3 * int32", "[10, 20, 30]");
    let out = apply(&lifted, &[&a, &b]).unwrap();
    assert_eq!(out.to_value().unwrap(), lit("[[11, 22, 33], [14, 25, 36]]"));

    let lifted = lift(&add("int32"), &[ty("2 * 3 * int32"), ty("2 * 1 * int32"), ty("int32")]).unwrap();
    let a = arr("2 * 1 * int32", "[[1], [2]]");
    let out = apply(&lifted, &[&a, &arr("int32", "100")]).unwrap();
    assert_eq!(out.to_value().unwrap(), lit("[[101, 101, 101], [102, 102, 102]]"));
}

#[test]
fn test_lift_broadcast_derives_destination() {
    let lifted = lift_broadcast(&add("int32"), &[ty("3 * 1 * int32"), ty("4 * int32")]).unwrap();
    assert_eq!(lifted.signature().ret, ty("3 * 4 * int32"));
    let a = arr("3 * 1 * int32", "[[1], [2], [3]]");
    let b = arr("4 * int32", "[10, 20, 30, 40]");
    let out = apply(&lifted, &[&a, &b]).unwrap();
    assert_eq!(
        out.to_value().unwrap(),
        lit("[[11, 21, 31, 41], [12, 22, 32, 42], [13, 23, 33, 43]]")
    );

    let err = lift_broadcast(&add("int32"), &[ty("3 * int32"), ty("4 * int32")]).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
    let err = lift_broadcast(&add("int32"), &[ty("var * int32"), ty("int32")]).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
}

#[test]
fn test_lift_shape_errors() {
    let neg = KernelDescriptor::primitive(PrimitiveOp::Negative, &ty("int32")).unwrap();
    let err = lift(&neg, &[ty("3 * int32"), ty("4 * int32")]).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
    let err = lift(&neg, &[ty("var * int32"), ty("var * int32")]).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
    let err = lift(&neg, &[ty("3 * int32"), ty("2 * 3 * int32")]).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
    let err = lift(&neg, &[ty("3 * int64"), ty("3 * int32")]).unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
    let err = lift(&neg, &[ty("3 * int32")]).unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
}

#[test]
fn test_var_dimension_broadcasts_at_call() {
    let neg = KernelDescriptor::primitive(PrimitiveOp::Negative, &ty("int32")).unwrap();
    let lifted = lift(&neg, &[ty("2 * 3 * int32"), ty("2 * var * int32")]).unwrap();

    let ragged = arr("2 * var * int32", "[[1, 2, 3], [4]]");
    let out = apply(&lifted, &[&ragged]).unwrap();
    assert_eq!(out.to_value().unwrap(), lit("[[-1, -2, -3], [-4, -4, -4]]"));

    let bad = arr("2 * var * int32", "[[1, 2], [4]]");
    let err = apply(&lifted, &[&bad]).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
}

#[test]
fn test_parallel_lift_matches_sequential() {
    let neg = KernelDescriptor::primitive(PrimitiveOp::Negative, &ty("int64")).unwrap();
    let lifted = lift(&neg, &[ty("1000 * int64"), ty("1000 * int64")]).unwrap();
    let input = int_range(1000);
    let sequential = apply(&lifted, &[&input]).unwrap();
    let mut kb = KernelBuffer::with_parallel_threshold(16);
    let parallel = apply_with(&lifted, &[&input], &mut kb).unwrap();
    assert!(kb.dump().contains("parallel"));
    assert_eq!(sequential.bytes(), parallel.bytes());
}

#[test]
fn test_closure_kernel() {
    let sig = Signature::new(vec![ty("float64"), ty("float64")], ty("float64"));
    let hypot = ScalarFn::new("hypot", |args| match args {
        [Value::Float(a), Value::Float(b)] => Ok(Value::Float(a.hypot(*b))),
        _ => Err("expected two floats".to_string()),
    });
    let desc = KernelDescriptor::from_fn(sig, FuncProto::Expr, hypot).unwrap();
    let lifted = lift_broadcast(&desc, &[ty("2 * float64"), ty("float64")]).unwrap();
    let out = apply(&lifted, &[&arr("2 * float64", "[3.0, 0.0]"), &arr("float64", "4.0")]).unwrap();
    assert_eq!(out.to_value().unwrap(), lit("[5.0, 4.0]"));

    let sig = Signature::new(vec![ty("int32")], ty("int32"));
    let failing = ScalarFn::new("boom", |_| Err("no".to_string()));
    let desc = KernelDescriptor::from_fn(sig.clone(), FuncProto::Unary, failing).unwrap();
    let err = apply(&desc, &[&arr("int32", "1")]).unwrap_err();
    assert!(err.is(ErrorCode::ForeignCallFailed));

    let noop = ScalarFn::new("noop", |args| Ok(args[0].clone()));
    let err = KernelDescriptor::from_fn(sig, FuncProto::BinaryPredicate, noop).unwrap_err();
    assert!(err.is(ErrorCode::InvalidFunctionPrototype));
}

// --- reductions ---

#[test]
fn test_reduce_all_axes() {
    let desc = reduce(&add("int32"), "2 * 3 * int32", ReductionSpec::default()).unwrap();
    assert_eq!(desc.signature().ret, ty("int32"));
    let out = apply(&desc, &[&arr("2 * 3 * int32", "[[1, 2, 3], [4, 5, 6]]")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Int(21));
}

#[test]
fn test_reduce_selected_axes() {
    let input = arr("2 * 3 * int32", "[[1, 2, 3], [4, 5, 6]]");

    let inner = reduce(&add("int32"), "2 * 3 * int32", axes(&[1])).unwrap();
    assert_eq!(inner.signature().ret, ty("2 * int32"));
    assert_eq!(apply(&inner, &[&input]).unwrap().to_value().unwrap(), lit("[6, 15]"));

    let outer = reduce(&add("int32"), "2 * 3 * int32", axes(&[-2])).unwrap();
    assert_eq!(outer.signature().ret, ty("3 * int32"));
    assert_eq!(apply(&outer, &[&input]).unwrap().to_value().unwrap(), lit("[5, 7, 9]"));
}

#[test]
fn test_reduce_keepdims() {
    let input = arr("2 * 3 * int32", "[[1, 2, 3], [4, 5, 6]]");
    let spec = ReductionSpec {
        keepdims: true,
        ..axes(&[1])
    };
    let desc = reduce(&add("int32"), "2 * 3 * int32", spec).unwrap();
    assert_eq!(desc.signature().ret, ty("2 * 1 * int32"));
    assert_eq!(apply(&desc, &[&input]).unwrap().to_value().unwrap(), lit("[[6], [15]]"));

    let spec = ReductionSpec {
        keepdims: true,
        ..ReductionSpec::default()
    };
    let desc = reduce(&add("int32"), "2 * 3 * int32", spec).unwrap();
    assert_eq!(desc.signature().ret, ty("1 * 1 * int32"));
}

#[test]
fn test_reduce_axis_out_of_bounds() {
    for bad in [2, -3] {
        let err = reduce(&add("int32"), "2 * 3 * int32", axes(&[bad])).unwrap_err();
        assert!(err.is(ErrorCode::AxisOutOfBounds), "axis {}", bad);
    }
    assert!(AxisSet::resolve(Some(&[0][..]), 65).unwrap_err().is(ErrorCode::AxisOutOfBounds));
    let set = AxisSet::resolve(Some(&[-1, 0][..]), 3).unwrap();
    assert!(set.contains(0) && set.contains(2) && !set.contains(1));
    assert_eq!(set.count(), 2);
    assert_eq!(AxisSet::resolve(None, 64).unwrap().count(), 64);
}

#[test]
fn test_reduce_empty_needs_identity() {
    let err = reduce(&add("int32"), "0 * int32", ReductionSpec::default()).unwrap_err();
    assert!(err.is(ErrorCode::EmptyReductionNoIdentity));

    let spec = ReductionSpec {
        identity: Some(Value::Int(0)),
        ..ReductionSpec::default()
    };
    let desc = reduce(&add("int32"), "0 * int32", spec).unwrap();
    let empty = Array::zeroed(ty("0 * int32")).unwrap();
    assert_eq!(apply(&desc, &[&empty]).unwrap().to_value().unwrap(), Value::Int(0));

    let err = reduce(&add("int32"), "2 * 0 * int32", axes(&[1])).unwrap_err();
    assert!(err.is(ErrorCode::EmptyReductionNoIdentity));
}

#[test]
fn test_reduce_empty_with_no_output_slices() {
    let desc = reduce(&add("int32"), "0 * 0 * int32", axes(&[1])).unwrap();
    assert_eq!(desc.signature().ret.to_string(), "0 * int32");
    let empty = Array::zeroed(ty("0 * 0 * int32")).unwrap();
    let out = apply(&desc, &[&empty]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::List(vec![]));
}

#[test]
fn test_reduce_identity_seeds_fold() {
    let spec = ReductionSpec {
        identity: Some(Value::Int(100)),
        ..ReductionSpec::default()
    };
    let desc = reduce(&add("int32"), "3 * int32", spec).unwrap();
    let out = apply(&desc, &[&arr("3 * int32", "[1, 2, 3]")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Int(106));
}

#[test]
fn test_reduce_rejects_bad_shapes() {
    let err = reduce(&add("int32"), "var * int32", ReductionSpec::default()).unwrap_err();
    assert!(err.is(ErrorCode::ShapeMismatch));
    let err = reduce(&add("int32"), "3 * int64", ReductionSpec::default()).unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
    let neg = KernelDescriptor::primitive(PrimitiveOp::Negative, &ty("int32")).unwrap();
    let err = reduce(&neg, "3 * int32", ReductionSpec::default()).unwrap_err();
    assert!(err.is(ErrorCode::InvalidFunctionPrototype));
}

#[test]
fn test_right_associative_fold() {
    // fold(acc, x) = x - acc
    let sig = Signature::new(vec![ty("int32"), ty("int32")], ty("int32"));
    let rsub = ScalarFn::new("rsub", |args| match args {
        [Value::Int(acc), Value::Int(x)] => Ok(Value::Int(x - acc)),
        _ => Err("expected integers".to_string()),
    });
    let elwise = KernelDescriptor::from_fn(sig, FuncProto::Expr, rsub).unwrap();
    let input = arr("4 * int32", "[1, 2, 3, 10]");

    let left = reduce(&elwise, "4 * int32", ReductionSpec::default()).unwrap();
    assert_eq!(apply(&left, &[&input]).unwrap().to_value().unwrap(), Value::Int(8));

    let spec = ReductionSpec {
        right_associative: true,
        ..ReductionSpec::default()
    };
    let right = reduce(&elwise, "4 * int32", spec).unwrap();
    assert_eq!(apply(&right, &[&input]).unwrap().to_value().unwrap(), Value::Int(-8));
}

#[test]
fn test_reduce_widening_accumulator() {
    let sig = Signature::new(vec![ty("int64"), ty("int32")], ty("int64"));
    let widen_add = ScalarFn::new("widen_add", |args| match args {
        [Value::Int(acc), Value::Int(x)] => Ok(Value::Int(acc + x)),
        _ => Err("expected integers".to_string()),
    });
    let elwise = KernelDescriptor::from_fn(sig, FuncProto::Expr, widen_add).unwrap();
    let desc = reduce(&elwise, "2 * int32", ReductionSpec::default()).unwrap();
    let out = apply(&desc, &[&arr("2 * int32", "[2000000000, 2000000000]")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Int(4_000_000_000));
}

#[test]
fn test_reduce_with_initializer() {
    // seed with the square of the first element
    let square = KernelDescriptor::primitive(PrimitiveOp::Square, &ty("int32")).unwrap();
    let desc = lift_reduction(&add("int32"), &ty("3 * int32"), Some(&square), &ReductionSpec::default()).unwrap();
    let out = apply(&desc, &[&arr("3 * int32", "[3, 1, 1]")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Int(11));

    // an identity takes precedence: every element goes through the fold
    let seeded = ReductionSpec {
        identity: Some(Value::Int(100)),
        ..ReductionSpec::default()
    };
    let desc = lift_reduction(&add("int32"), &ty("3 * int32"), Some(&square), &seeded).unwrap();
    let out = apply(&desc, &[&arr("3 * int32", "[3, 1, 1]")]).unwrap();
    assert_eq!(out.to_value().unwrap(), Value::Int(105));

    let wrong = KernelDescriptor::primitive(PrimitiveOp::Square, &ty("int64")).unwrap();
    let err = lift_reduction(&add("int32"), &ty("3 * int32"), Some(&wrong), &ReductionSpec::default()).unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
}

#[test]
fn test_parallel_reduction_matches_sequential() {
    let spec = ReductionSpec {
        associative: true,
        commutative: true,
        ..ReductionSpec::default()
    };
    let desc = reduce(&add("int64"), "1000 * int64", spec).unwrap();
    assert!(desc.describe().contains("associative"));
    let input = int_range(1000);
    let sequential = apply(&desc, &[&input]).unwrap();
    let mut kb = KernelBuffer::with_parallel_threshold(16);
    let parallel = apply_with(&desc, &[&input], &mut kb).unwrap();
    assert_eq!(sequential.to_value().unwrap(), Value::Int(499_500));
    assert_eq!(parallel.to_value().unwrap(), Value::Int(499_500));
}

#[test]
fn test_reduce_lifted_over_rows() {
    // lifting a row reduction gives the same answer as reducing axis 1
    let row_sum = reduce(&add("int32"), "3 * int32", ReductionSpec::default()).unwrap();
    let lifted = lift(&row_sum, &[ty("2 * int32"), ty("2 * 3 * int32")]).unwrap();
    let input = arr("2 * 3 * int32", "[[1, 2, 3], [4, 5, 6]]");
    assert_eq!(apply(&lifted, &[&input]).unwrap().to_value().unwrap(), lit("[6, 15]"));
}
