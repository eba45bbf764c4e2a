//! Runtime support for the opal JIT.
//!
//! NaN-boxed values, the attribute-table object heap the compiled code
//! manipulates through host callbacks, and the executable-memory publisher.

mod exec;
mod host;
mod object;
mod value;

pub use exec::{ExecBuffer, PublishError};
pub use host::{HostCallbacks, ERR_TYPE_GUARD};
pub use object::{Object, ObjectHeap};
pub use value::Value;

#[cfg(target_arch = "x86_64")]
pub use host::{rt_attr_ptr, rt_error, rt_object_new};
