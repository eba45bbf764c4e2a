//! Executable-memory publisher.

use std::fmt;

/// Failure to map or protect executable pages.
#[derive(Debug)]
pub struct PublishError(region::Error);

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to publish executable code: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

impl From<region::Error> for PublishError {
    fn from(err: region::Error) -> Self {
        PublishError(err)
    }
}

/// A page-backed buffer holding published machine code.
///
/// The mapping is allocated read-write, filled, then flipped to
/// read-execute; it is unmapped when the buffer drops, so the owner must
/// outlive every function pointer handed out.
pub struct ExecBuffer {
    alloc: region::Allocation,
    len: usize,
}

impl ExecBuffer {
    /// Copy `code` into fresh pages and make them executable.
    pub fn publish(code: &[u8]) -> Result<ExecBuffer, PublishError> {
        let mut alloc = region::alloc(code.len().max(1), region::Protection::READ_WRITE)?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), alloc.as_mut_ptr::<u8>(), code.len());
            region::protect(
                alloc.as_ptr::<u8>(),
                alloc.len(),
                region::Protection::READ_EXECUTE,
            )?;
        }
        Ok(ExecBuffer {
            alloc,
            len: code.len(),
        })
    }

    /// Entry address of the published code.
    pub fn as_ptr(&self) -> *const u8 {
        self.alloc.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ExecBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .finish()
    }
}
