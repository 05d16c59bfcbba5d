//! Fallback for platforms without a NUMA backend.

use crate::audit::WorkingSetBuffer;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::topology::{GroupAffinity, ProcessorLocation};
use crate::utils::alignment;

/// Backend that fails every NUMA query with [`Error::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPlatform;

impl UnsupportedPlatform {
    /// Create the backend.
    #[inline]
    pub fn new() -> UnsupportedPlatform {
        UnsupportedPlatform
    }
}

impl Platform for UnsupportedPlatform {
    fn highest_node_number(&self) -> Result<u32> {
        Err(Error::Unsupported)
    }

    fn node_affinity(&self, _node: u32) -> Result<GroupAffinity> {
        Err(Error::Unsupported)
    }

    fn current_processor(&self) -> Result<ProcessorLocation> {
        Err(Error::Unsupported)
    }

    fn set_current_thread_affinity(&self, _affinity: &GroupAffinity) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn page_size(&self) -> usize {
        alignment::page_size()
    }

    fn query_working_set(&self, _buffer: &mut WorkingSetBuffer) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn available_memory(&self, _node: u32) -> Result<u64> {
        Err(Error::Unsupported)
    }
}
