//! Platform-specific NUMA queries.
//!
//! Everything this crate needs from the operating system goes through the
//! [`Platform`] trait: topology, the current processor, thread affinity, and
//! batched per-page working-set attributes. Native implementations exist for
//! Linux and Windows; other targets get a backend that reports
//! [`Error::Unsupported`](crate::Error::Unsupported). The
//! [`simulated`] backend models a machine in memory for tests and dry runs.

use crate::audit::WorkingSetBuffer;
use crate::error::Result;
use crate::topology::{GroupAffinity, ProcessorLocation};

pub mod simulated;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::LinuxPlatform as NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::WindowsPlatform as NativePlatform;

#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;
#[cfg(not(any(target_os = "linux", windows)))]
pub use self::unsupported::UnsupportedPlatform as NativePlatform;

/// The operating system boundary.
///
/// Implementations must be shareable across worker threads. Every method is
/// a synchronous query that returns quickly; failures are reported as
/// [`Error::PlatformQuery`](crate::Error::PlatformQuery) and never retried.
pub trait Platform: Send + Sync {
    /// Highest NUMA node id the system may report.
    fn highest_node_number(&self) -> Result<u32>;

    /// Processors of node `node`. An empty mask means the node has no
    /// active processor.
    fn node_affinity(&self, node: u32) -> Result<GroupAffinity>;

    /// The logical processor the calling thread is running on.
    fn current_processor(&self) -> Result<ProcessorLocation>;

    /// Node owning `location` when it lies outside every node's reported
    /// affinity, as happens for nodes spanning several processor groups.
    fn node_of_processor(&self, _location: ProcessorLocation) -> Option<u32> {
        None
    }

    /// Restrict the calling thread to exactly `affinity`.
    fn set_current_thread_affinity(&self, affinity: &GroupAffinity) -> Result<()>;

    /// System page size in bytes.
    fn page_size(&self) -> usize;

    /// Fill in the attributes of every page in `buffer` with one query.
    fn query_working_set(&self, buffer: &mut WorkingSetBuffer) -> Result<()>;

    /// Free memory on node `node`, in bytes.
    fn available_memory(&self, node: u32) -> Result<u64>;
}

impl<P: Platform + ?Sized> Platform for &P {
    fn highest_node_number(&self) -> Result<u32> {
        (**self).highest_node_number()
    }

    fn node_affinity(&self, node: u32) -> Result<GroupAffinity> {
        (**self).node_affinity(node)
    }

    fn current_processor(&self) -> Result<ProcessorLocation> {
        (**self).current_processor()
    }

    fn node_of_processor(&self, location: ProcessorLocation) -> Option<u32> {
        (**self).node_of_processor(location)
    }

    fn set_current_thread_affinity(&self, affinity: &GroupAffinity) -> Result<()> {
        (**self).set_current_thread_affinity(affinity)
    }

    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn query_working_set(&self, buffer: &mut WorkingSetBuffer) -> Result<()> {
        (**self).query_working_set(buffer)
    }

    fn available_memory(&self, node: u32) -> Result<u64> {
        (**self).available_memory(node)
    }
}

/// The backend for the current target.
#[inline]
pub fn native() -> NativePlatform {
    NativePlatform::new()
}

/// Check if the native backend can answer NUMA queries on this system.
#[inline]
pub fn is_supported() -> bool {
    native().highest_node_number().is_ok()
}
