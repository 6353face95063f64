pub mod api;
pub mod array;
pub mod config;
pub mod diagnostic;
pub mod foreign;
pub mod infer;
pub mod kernel;
pub mod syntax;
pub mod types;
pub mod value;

// Re-exports: short paths for the CLI and tests
pub use syntax::span;

pub use api::{lowlevel_api, LowLevelApi, LOWLEVEL_API_VERSION};
pub use array::{Access, Array, ErrorMode};
pub use config::Config;
pub use diagnostic::{Diagnostic, ErrorCode};
pub use foreign::{DispatchTable, InnerLoop, Registry};
pub use infer::{array_from_value, build_array, BuildReport, IncrementalBuilder, InferOptions, Item};
pub use kernel::{
    apply, lift, lift_broadcast, lift_reduction, make_assignment_kernel, FuncProto, KernelBuffer,
    KernelDescriptor, KernelRequest, OperandMeta, PrimitiveOp, ReductionSpec, ScalarFn, Signature,
};
pub use types::{promote, Dim, ScalarKind, Type};
pub use value::Value;

/// Parse a value literal and build an array from it with `options`.
pub fn infer_literal(source: &str, options: &InferOptions) -> Result<(Array, BuildReport), Vec<Diagnostic>> {
    let value = syntax::parse_value(source)?;
    build_array(Item::Value(value), options).map_err(|e| vec![e])
}
