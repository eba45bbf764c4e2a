//! Host callbacks reachable from generated code.
//!
//! Emitted call sites load these as raw 64-bit immediates, so the table
//! stores plain addresses rather than typed function pointers; the backend
//! stays target-host agnostic and only the façade constructs the table from
//! real `extern "win64"` functions.

#[cfg(target_arch = "x86_64")]
use crate::{Object, ObjectHeap, Value};

/// Error code passed to the reporter when a type guard fails.
pub const ERR_TYPE_GUARD: u32 = 1;

/// Addresses of the host entry points baked into compiled code.
///
/// `resolve(ctx, name)` returns the compiled entry of a global; `object_new(heap)`
/// allocates an attribute table; `attr_ptr(obj, name)` returns a slot address;
/// `error(code)` reports a runtime guard failure. All targets use the
/// Windows x64 calling convention.
#[derive(Debug, Clone, Copy)]
pub struct HostCallbacks {
    pub ctx: u64,
    pub resolve: u64,
    pub heap: u64,
    pub object_new: u64,
    pub attr_ptr: u64,
    pub error: u64,
}

/// Allocate a fresh object on the heap behind `heap`.
#[cfg(target_arch = "x86_64")]
pub extern "win64" fn rt_object_new(heap: *mut ObjectHeap) -> Value {
    let heap = unsafe { &mut *heap };
    Value::from_ptr(heap.alloc())
}

/// Resolve the attribute slot address for `name` in `obj`.
#[cfg(target_arch = "x86_64")]
pub extern "win64" fn rt_attr_ptr(obj: Value, name: u64) -> *mut Value {
    let obj = unsafe { &mut *obj.as_ptr::<Object>() };
    obj.attr_ptr(name)
}

/// Report a runtime guard failure. The guarded function returns the error
/// sentinel value afterwards.
#[cfg(target_arch = "x86_64")]
pub extern "win64" fn rt_error(code: u32) {
    log::error!("jit runtime error: code {code}");
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn test_object_new_and_attr_round_trip() {
        let mut heap = ObjectHeap::new();
        let obj = rt_object_new(&mut heap);
        assert!(obj.is_ptr());

        let name = 0xABCD_u64;
        let slot = rt_attr_ptr(obj, name);
        unsafe { *slot = Value::from_i32(5) };
        assert_eq!(unsafe { *rt_attr_ptr(obj, name) }, Value::from_i32(5));
    }
}
