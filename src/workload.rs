//! The boundary with the compute engine whose work gets pinned.
//!
//! The engine itself (model loading, compilation, tensors) lives elsewhere.
//! All that is needed from it is a unit of work compiled once and shared
//! read-only, per-thread execution handles created from it, and the raw
//! address ranges of buffers worth auditing.

use crate::error::Result;

/// A compiled unit of work, shared read-only by every worker thread.
pub trait CompiledUnit: Sync {
    /// Per-thread execution state.
    type Handle: ExecutionHandle;

    /// Create an execution handle. Called on the thread that will use it,
    /// after that thread has been pinned, so first-touch allocations land on
    /// the thread's node.
    fn create_handle(&self) -> Result<Self::Handle>;
}

/// Per-thread execution state created from a [`CompiledUnit`].
pub trait ExecutionHandle {
    /// Run the unit of work once. May be called repeatedly.
    fn execute(&mut self) -> Result<()>;

    /// Buffers owned by this handle whose locality can be audited.
    fn buffers(&self) -> Vec<BufferSpan> {
        Vec::new()
    }
}

/// The raw address range of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSpan {
    /// Label used in reports.
    pub name: String,

    /// Address of the first byte.
    pub address: usize,

    /// Length in bytes.
    pub len: usize,
}

impl BufferSpan {
    /// Describe `len` bytes at `address`.
    pub fn new(name: impl Into<String>, address: usize, len: usize) -> BufferSpan {
        BufferSpan {
            name: name.into(),
            address,
            len,
        }
    }

    /// Describe the memory of `data`.
    pub fn from_slice<T>(name: impl Into<String>, data: &[T]) -> BufferSpan {
        BufferSpan::new(name, data.as_ptr() as usize, std::mem::size_of_val(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice() {
        let data = [0u32; 16];
        let span = BufferSpan::from_slice("input", &data);
        assert_eq!(span.name, "input");
        assert_eq!(span.address, data.as_ptr() as usize);
        assert_eq!(span.len, 64);
    }
}
