//! A versioned table of entry points for embedders.
//!
//! Hosts fetch the table once with [`lowlevel_api`] and check its `version`
//! against the [`LOWLEVEL_API_VERSION`] they were built for. Adding a field
//! bumps the version.

use std::any::Any;
use std::sync::Arc;

use crate::array::Array;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::foreign::{build_deferred_kernel_from_function, enumerate_signatures, DispatchTable};
use crate::kernel::{
    lift, lift_reduction, make_assignment_kernel, FuncProto, KernelBuffer, KernelDescriptor, OperandMeta,
    ReductionSpec, ScalarFn, Signature,
};
use crate::types::Type;

pub const LOWLEVEL_API_VERSION: u32 = 1;

type DescriptorResult = Result<KernelDescriptor, Diagnostic>;

pub struct LowLevelApi {
    pub version: u32,
    pub get_array_pointer: fn(&Array) -> *const u8,
    pub get_type_pointer: fn(&Array) -> &Type,
    /// See [`Array::from_raw`]; the pointer is passed as an address.
    pub array_from_pointer: unsafe fn(Type, usize, Arc<dyn Any + Send + Sync>, &str) -> Result<Array, Diagnostic>,
    #[allow(clippy::type_complexity)]
    pub make_assignment_kernel: fn(
        &mut KernelBuffer,
        usize,
        &Type,
        Option<&OperandMeta>,
        &Type,
        Option<&OperandMeta>,
        &str,
        &str,
    ) -> Result<usize, Diagnostic>,
    pub make_deferred_kernel_from_assignment: fn(&Type, &Type, &str, &str) -> DescriptorResult,
    pub make_deferred_kernel_from_property: fn(&Type, &str, &str, &str) -> DescriptorResult,
    pub enumerate_signatures: fn(&dyn DispatchTable, &str) -> Result<Vec<Signature>, Diagnostic>,
    pub build_deferred_kernel_from_function: fn(&dyn DispatchTable, &str, &Signature, bool) -> DescriptorResult,
    pub lift_kernel: fn(&KernelDescriptor, &[Type]) -> DescriptorResult,
    pub lift_reduction_kernel: fn(&KernelDescriptor, &Type, Option<&KernelDescriptor>, &ReductionSpec) -> DescriptorResult,
    pub make_deferred_kernel_from_fn: fn(Signature, FuncProto, ScalarFn) -> DescriptorResult,
}

impl LowLevelApi {
    /// Fail unless this table is the version the caller was built against.
    pub fn check_version(&self, expected: u32) -> Result<(), Diagnostic> {
        if self.version != expected {
            return Err(Diagnostic::error(
                ErrorCode::UnsupportedValue,
                format!(
                    "low-level API version mismatch: library provides {}, caller expects {}",
                    self.version, expected
                ),
            ));
        }
        Ok(())
    }
}

unsafe fn array_from_pointer(
    ty: Type,
    address: usize,
    owner: Arc<dyn Any + Send + Sync>,
    access: &str,
) -> Result<Array, Diagnostic> {
    // SAFETY: the caller upholds `Array::from_raw`'s contract for `address`.
    unsafe { Array::from_raw(ty, address as *const u8, owner, access) }
}

static API: LowLevelApi = LowLevelApi {
    version: LOWLEVEL_API_VERSION,
    get_array_pointer: Array::data_ptr,
    get_type_pointer: Array::ty,
    array_from_pointer,
    make_assignment_kernel,
    make_deferred_kernel_from_assignment: KernelDescriptor::from_assignment,
    make_deferred_kernel_from_property: KernelDescriptor::from_property,
    enumerate_signatures,
    build_deferred_kernel_from_function,
    lift_kernel: lift,
    lift_reduction_kernel: lift_reduction,
    make_deferred_kernel_from_fn: KernelDescriptor::from_fn,
};

pub fn lowlevel_api() -> &'static LowLevelApi {
    &API
}
