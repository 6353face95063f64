use std::cell::Cell;
use std::rc::Rc;

use super::*;
use crate::syntax::parse_value;

fn lit(source: &str) -> Value {
    parse_value(source).unwrap()
}

fn build(source: &str) -> (Array, BuildReport) {
    build_array(Item::Value(lit(source)), &InferOptions::default()).unwrap()
}

fn build_err(source: &str) -> Diagnostic {
    build_array(Item::Value(lit(source)), &InferOptions::default()).unwrap_err()
}

#[test]
fn test_mixed_int_float_promotes() {
    let (arr, report) = build("[1, 2, 3.5]");
    assert_eq!(arr.ty().to_string(), "3 * float64");
    assert_eq!(arr.to_value().unwrap(), lit("[1.0, 2.0, 3.5]"));
    assert_eq!(report.elements, 3);
    assert_eq!(report.promotions, 1);
    assert!(report.retagged >= 2);
}

#[test]
fn test_nested_empty_and_ragged() {
    let (arr, _) = build("[[], [[],[]], [], [[],[3.5]]]");
    assert_eq!(arr.ty().to_string(), "4 * var * var * float64");
    assert_eq!(arr.to_value().unwrap(), lit("[[], [[], []], [], [[], [3.5]]]"));
}

#[test]
fn test_uniform_nesting_is_fixed() {
    let (arr, report) = build("[[1, 2], [3, 4], [5, 6]]");
    assert_eq!(arr.ty().to_string(), "3 * 2 * int64");
    assert_eq!(report.promotions, 0);
    assert_eq!(report.retagged, 0);
}

#[test]
fn test_ragged_nesting_is_var() {
    let (arr, _) = build("[[1], [2, 3]]");
    assert_eq!(arr.ty().to_string(), "2 * var * int64");
    assert_eq!(arr.to_value().unwrap(), lit("[[1], [2, 3]]"));
}

#[test]
fn test_scalar_root() {
    let (arr, _) = build("5");
    assert_eq!(*arr.ty(), Type::int(64));
    assert_eq!(arr.to_value().unwrap(), Value::Int(5));
}

#[test]
fn test_all_empty_uses_empty_dtype() {
    let (arr, _) = build("[]");
    assert_eq!(arr.ty().to_string(), "0 * int32");

    let options = InferOptions {
        empty_dtype: Type::float(64),
        ..InferOptions::default()
    };
    let (arr, _) = build_array(Item::Value(lit("[[], []]")), &options).unwrap();
    assert_eq!(arr.ty().to_string(), "2 * 0 * float64");
}

#[test]
fn test_strings_and_records() {
    let (arr, _) = build(r#"[{name: "a", score: 1}, {name: "bcd", score: 2.5}]"#);
    assert_eq!(arr.ty().to_string(), "2 * {name: string, score: float64}");
    assert_eq!(
        arr.to_value().unwrap(),
        lit(r#"[{name: "a", score: 1.0}, {name: "bcd", score: 2.5}]"#)
    );
}

#[test]
fn test_complex_promotion() {
    let (arr, _) = build("[1, 2j, true]");
    assert_eq!(arr.ty().to_string(), "3 * complex128");
    assert_eq!(arr.to_value().unwrap(), lit("[1+0j, 2j, 1+0j]"));
}

#[test]
fn test_bool_and_uint() {
    let (arr, _) = build("[true, 18446744073709551615]");
    assert_eq!(arr.ty().to_string(), "2 * uint64");
}

#[test]
fn test_mismatch_reports_path() {
    let err = build_err("[1, \"x\"]");
    assert!(err.is(ErrorCode::TypeMismatch));
    assert!(err.notes.iter().any(|n| n == "at [1]"), "{:?}", err.notes);

    let err = build_err("[[1, 2], [3, [4]]]");
    assert!(err.is(ErrorCode::TypeMismatch));
    assert!(err.notes.iter().any(|n| n == "at [1][1]"), "{:?}", err.notes);
}

#[test]
fn test_unsigned_out_of_signed_range() {
    // uint64 and int64 meet at int64, which cannot hold the large value
    let err = build_err("[18446744073709551615, -1]");
    assert!(err.is(ErrorCode::ConversionError), "{:?}", err);

    let (arr, _) = build("[18446744073709551615]");
    assert_eq!(arr.ty().to_string(), "1 * uint64");
    assert_eq!(arr.to_value().unwrap(), Value::List(vec![Value::UInt(u64::MAX)]));

    let (arr, _) = build("[18446744073709551615, 0.5]");
    assert_eq!(arr.ty().to_string(), "2 * float64");
}

#[test]
fn test_null_is_unsupported() {
    let err = build_err("[1, null]");
    assert!(err.is(ErrorCode::UnsupportedValue));
}

#[test]
fn test_duplicate_record_field() {
    let source = Item::Record(vec![
        ("a".to_string(), Item::Value(Value::Int(1))),
        ("a".to_string(), Item::Value(Value::Int(2))),
    ]);
    let err = build_array(source, &InferOptions::default()).unwrap_err();
    assert!(err.is(ErrorCode::UnsupportedValue));
}

#[test]
fn test_broadcast_option() {
    assert!(build_err("[1, [2, 3]]").is(ErrorCode::TypeMismatch));

    let options = InferOptions {
        allow_broadcast: true,
        ..InferOptions::default()
    };
    let (arr, _) = build_array(Item::Value(lit("[1, [2, 3]]")), &options).unwrap();
    assert_eq!(arr.ty().to_string(), "2 * 2 * int64");
    assert_eq!(arr.to_value().unwrap(), lit("[[1, 1], [2, 3]]"));
}

/// An iterator that counts how many items were pulled from it.
struct Counted<I> {
    inner: I,
    pulled: Rc<Cell<usize>>,
}

impl<I: Iterator> Iterator for Counted<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let item = self.inner.next();
        if item.is_some() {
            self.pulled.set(self.pulled.get() + 1);
        }
        item
    }
}

#[test]
fn test_single_pass_generator() {
    let pulled = Rc::new(Cell::new(0));
    let source = Counted {
        inner: vec![Value::Int(1), Value::Int(2), Value::Float(0.5)]
            .into_iter()
            .map(Item::Value),
        pulled: pulled.clone(),
    };
    let (arr, report) = build_array(Item::seq(source), &InferOptions::default()).unwrap();
    assert_eq!(pulled.get(), 3);
    assert_eq!(arr.ty().to_string(), "3 * float64");
    assert_eq!(report.promotions, 1);
}

#[test]
fn test_generator_mismatch_fails_fast() {
    let pulled = Rc::new(Cell::new(0));
    let source = Counted {
        inner: vec![
            Value::Int(1),
            Value::Str("x".into()),
            Value::Int(3),
            Value::Int(4),
        ]
        .into_iter()
        .map(Item::Value),
        pulled: pulled.clone(),
    };
    let err = build_array(Item::seq(source), &InferOptions::default()).unwrap_err();
    assert!(err.is(ErrorCode::TypeMismatch));
    // stops at the offending element and never rewinds
    assert_eq!(pulled.get(), 2);
}

#[test]
fn test_nested_generators() {
    let rows = (0..3).map(|r| Item::seq((0..r + 1).map(move |c| Item::Value(Value::Int(r * 10 + c)))));
    let (arr, _) = build_array(Item::seq(rows), &InferOptions::default()).unwrap();
    assert_eq!(arr.ty().to_string(), "3 * var * int64");
    assert_eq!(arr.to_value().unwrap(), lit("[[0], [10, 11], [20, 21, 22]]"));
}

#[test]
fn test_array_from_value_helper() {
    let arr = array_from_value(lit("[[1.5], [2.5]]")).unwrap();
    assert_eq!(arr.ty().to_string(), "2 * 1 * float64");
}
