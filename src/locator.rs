//! Where is the calling thread running?

use std::fmt;

use crate::error::Result;
use crate::platform::Platform;
use crate::topology::TopologyCatalog;
use crate::utils::metrics::{self, Operation};

/// Processor, group and node of a thread at the instant of the query.
///
/// `None` marks a value that could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadLocation {
    /// Logical processor within the group.
    pub cpu: Option<u8>,

    /// Processor group.
    pub group: Option<u16>,

    /// OS id of the NUMA node owning the processor.
    pub node: Option<u32>,
}

impl ThreadLocation {
    /// A location with every field unknown.
    pub const UNKNOWN: ThreadLocation = ThreadLocation {
        cpu: None,
        group: None,
        node: None,
    };
}

struct Field<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("-1"),
        }
    }
}

impl fmt::Display for ThreadLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Cpu={},Grp={},Numa={}]",
            Field(self.cpu),
            Field(self.group),
            Field(self.node)
        )
    }
}

/// Resolves the current thread's processor to a cataloged node.
#[derive(Debug)]
pub struct ThreadLocator<'a, P: Platform + ?Sized> {
    catalog: &'a TopologyCatalog,
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> ThreadLocator<'a, P> {
    /// Create a locator over `catalog`.
    #[inline]
    pub fn new(catalog: &'a TopologyCatalog, platform: &'a P) -> ThreadLocator<'a, P> {
        ThreadLocator { catalog, platform }
    }

    /// Locate the calling thread.
    ///
    /// Fails only when the processor query fails. A processor outside every
    /// cataloged node's affinity is resolved through the platform, and
    /// otherwise leaves `node` unknown.
    pub fn locate(&self) -> Result<ThreadLocation> {
        let processor = metrics::measure(Operation::Locate, 0, || self.platform.current_processor())?;

        let node = self.catalog.node_for_processor(processor).map(|n| n.id).or_else(|| {
            self.platform
                .node_of_processor(processor)
                .filter(|&id| self.catalog.index_of(id).is_some())
        });

        Ok(ThreadLocation {
            cpu: Some(processor.number),
            group: Some(processor.group),
            node,
        })
    }

    /// The calling thread's location formatted for logging.
    pub fn describe(&self) -> Result<String> {
        self.locate().map(|location| location.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::SimulatedPlatform;
    use crate::topology::{GroupAffinity, ProcessorLocation};
    use std::thread;

    #[test]
    fn test_unknown_format() {
        assert_eq!(ThreadLocation::UNKNOWN.to_string(), "[Cpu=-1,Grp=-1,Numa=-1]");
    }

    #[test]
    fn test_locate_resolves_node() {
        let platform = SimulatedPlatform::with_nodes(2, 4);
        let catalog = TopologyCatalog::discover(&platform).unwrap();
        platform.set_current_thread_affinity(&GroupAffinity::new(0, 0xf0)).unwrap();

        let locator = ThreadLocator::new(&catalog, &platform);
        let location = locator.locate().unwrap();
        assert_eq!(location.cpu, Some(4));
        assert_eq!(location.group, Some(0));
        assert_eq!(location.node, Some(1));
        assert_eq!(locator.describe().unwrap(), "[Cpu=4,Grp=0,Numa=1]");
    }

    #[test]
    fn test_unmatched_processor_leaves_node_unknown() {
        let platform = SimulatedPlatform::builder()
            .node(0, GroupAffinity::new(0, 0x3))
            .idle_processor(ProcessorLocation::new(2, 9))
            .build();
        let catalog = TopologyCatalog::discover(&platform).unwrap();

        let location = ThreadLocator::new(&catalog, &platform).locate().unwrap();
        assert_eq!(location.node, None);
        assert_eq!(location.to_string(), "[Cpu=9,Grp=2,Numa=-1]");
    }

    #[test]
    fn test_processor_in_secondary_group() {
        let platform = SimulatedPlatform::builder()
            .node(0, GroupAffinity::new(0, 0xff))
            .node(1, GroupAffinity::new(1, u64::MAX))
            .secondary_group(1, GroupAffinity::new(2, 0xf))
            .secondary_group(7, GroupAffinity::new(3, 0x1))
            .idle_processor(ProcessorLocation::new(2, 3))
            .build();
        let catalog = TopologyCatalog::discover(&platform).unwrap();
        let locator = ThreadLocator::new(&catalog, &platform);

        assert_eq!(locator.describe().unwrap(), "[Cpu=3,Grp=2,Numa=1]");

        // a node the catalog does not know stays unknown
        thread::scope(|s| {
            s.spawn(|| {
                platform.set_current_thread_affinity(&GroupAffinity::new(3, 0x1)).unwrap();
                assert_eq!(locator.locate().unwrap().node, None);
            });
        });
    }

    #[test]
    fn test_processor_query_failure() {
        let platform = SimulatedPlatform::with_nodes(1, 2);
        let catalog = TopologyCatalog::discover(&platform).unwrap();
        platform.fail_current_processor();

        let err = ThreadLocator::new(&catalog, &platform).locate().unwrap_err();
        assert!(err.is_platform_query());
    }
}
