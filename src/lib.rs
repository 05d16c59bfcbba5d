//! # numabind
//!
//! `numabind` pins worker threads to NUMA nodes and audits where their memory
//! actually lives. It discovers the node topology once, assigns workers to
//! nodes round-robin or through a dispatch template, reports which processor
//! and node a thread is running on, and walks the pages of a buffer to show
//! which node each run of pages is resident on.
//!
//! ## Features
//!
//! - Topology discovery with processor-group aware affinity masks
//! - Round-robin or template-driven worker-to-node dispatch
//! - Thread location queries formatted for logging
//! - Batched per-page residency queries coalesced into contiguous regions
//! - A pinned runner driving a compiled unit of work, one worker per node
//! - Native backends for Linux and Windows, plus an in-memory simulated machine
//!
//! ## Example
//!
//! ```
//! use numabind::platform::simulated::SimulatedPlatform;
//! use numabind::{AffinityDispatcher, ThreadLocator, TopologyCatalog};
//!
//! # fn main() -> numabind::Result<()> {
//! let platform = SimulatedPlatform::with_nodes(2, 8);
//! let catalog = TopologyCatalog::discover(&platform)?;
//!
//! let dispatcher = AffinityDispatcher::new(&catalog, &platform)?;
//! let node = dispatcher.pin_current_thread(1)?;
//!
//! let location = ThreadLocator::new(&catalog, &platform).locate()?;
//! assert_eq!(location.node, Some(node.id));
//! println!("running at {}", location);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod dispatch;
pub mod error;
pub mod locator;
pub mod platform;
pub mod runner;
pub mod topology;
pub mod utils;
pub mod workload;

pub use audit::{LocalityReport, MemoryAuditor, MemoryRegion, PageAttribute, PageSpan, WorkingSetBuffer};
pub use dispatch::{AffinityDispatcher, DispatchTemplate};
pub use error::{Error, Result};
pub use locator::{ThreadLocation, ThreadLocator};
pub use runner::{BufferAudit, PinnedRunner, RunnerOptions, WorkerReport};
pub use topology::{GroupAffinity, NumaNode, ProcessorLocation, TopologyCatalog};
pub use workload::{BufferSpan, CompiledUnit, ExecutionHandle};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if NUMA queries are available on this system
#[inline]
pub fn has_numa_support() -> bool {
    platform::is_supported()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
