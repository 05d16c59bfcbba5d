//! NUMA topology discovery.
//!
//! The [`TopologyCatalog`] is built once by the controller, before any worker
//! thread exists, and then shared by reference with the dispatcher, the
//! locator and the runner. It is never mutated after discovery; a changed
//! NUMA configuration requires discovering a new catalog.

use std::fmt;

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::utils::metrics::{self, Operation};

/// A set of logical processors inside one processor group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GroupAffinity {
    /// Processor group the mask applies to.
    pub group: u16,

    /// Bit `n` is set when logical processor `n` of the group is a member.
    pub mask: u64,
}

impl GroupAffinity {
    /// Create an affinity from a group and a processor mask.
    #[inline]
    pub const fn new(group: u16, mask: u64) -> GroupAffinity {
        GroupAffinity { group, mask }
    }

    /// Returns `true` if no processor is part of the set.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Number of processors in the set.
    #[inline]
    pub const fn processor_count(&self) -> u32 {
        self.mask.count_ones()
    }

    /// Returns `true` if the processor at `location` belongs to this set.
    #[inline]
    pub fn contains(&self, location: ProcessorLocation) -> bool {
        self.group == location.group
            && location.number < 64
            && (self.mask >> location.number) & 0x01 != 0
    }

    /// Iterate over the processor numbers (within the group) in the set.
    pub fn processors(&self) -> impl Iterator<Item = u8> + '_ {
        (0..64u8).filter(move |bit| (self.mask >> bit) & 0x01 != 0)
    }
}

impl fmt::Display for GroupAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:016x}", self.group, self.mask)
    }
}

/// The logical processor a thread is executing on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorLocation {
    /// Processor group.
    pub group: u16,

    /// Index of the logical processor within the group.
    pub number: u8,
}

impl ProcessorLocation {
    /// Create a processor location.
    #[inline]
    pub const fn new(group: u16, number: u8) -> ProcessorLocation {
        ProcessorLocation { group, number }
    }
}

/// A NUMA node with at least one active logical processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumaNode {
    /// OS-assigned node id. Ids are not necessarily contiguous.
    pub id: u32,

    /// Processors belonging to the node.
    pub affinity: GroupAffinity,
}

impl NumaNode {
    /// Create a node description.
    #[inline]
    pub const fn new(id: u32, affinity: GroupAffinity) -> NumaNode {
        NumaNode { id, affinity }
    }
}

/// The set of active NUMA nodes, in ascending node id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyCatalog {
    nodes: Vec<NumaNode>,
}

impl TopologyCatalog {
    /// Query the platform for every node up to the highest node number and
    /// keep those with at least one active processor.
    ///
    /// Fails on the first platform query that reports an error.
    pub fn discover<P: Platform + ?Sized>(platform: &P) -> Result<TopologyCatalog> {
        metrics::measure(Operation::Discover, 0, || {
            let highest = platform.highest_node_number()?;
            let mut nodes = Vec::new();

            for id in 0..=highest {
                let affinity = platform.node_affinity(id)?;
                if affinity.is_empty() {
                    tracing::debug!(node = id, "skipping NUMA node without active processors");
                    continue;
                }
                tracing::debug!(node = id, group = affinity.group, mask = affinity.mask, "discovered NUMA node");
                nodes.push(NumaNode::new(id, affinity));
            }

            Ok(TopologyCatalog { nodes })
        })
    }

    /// Build a catalog from already known nodes.
    ///
    /// Nodes with an empty mask are dropped and the rest sorted by id.
    pub fn from_nodes(nodes: impl IntoIterator<Item = NumaNode>) -> TopologyCatalog {
        let mut nodes: Vec<NumaNode> = nodes.into_iter().filter(|n| !n.affinity.is_empty()).collect();
        nodes.sort_by_key(|n| n.id);
        TopologyCatalog { nodes }
    }

    /// Number of cataloged nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node was discovered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All cataloged nodes.
    #[inline]
    pub fn nodes(&self) -> &[NumaNode] {
        &self.nodes
    }

    /// The node at catalog `index`.
    #[inline]
    pub fn node(&self, index: usize) -> Option<&NumaNode> {
        self.nodes.get(index)
    }

    /// Catalog index of the node with OS id `id`.
    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// The node whose processor set contains `location`.
    pub fn node_for_processor(&self, location: ProcessorLocation) -> Option<&NumaNode> {
        self.nodes.iter().find(|n| n.affinity.contains(location))
    }

    /// Free memory, in bytes, on the node at catalog `index`.
    pub fn available_memory<P: Platform + ?Sized>(&self, platform: &P, index: usize) -> Result<u64> {
        let node = self.node(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "catalog index {} out of range ({} nodes)",
                index,
                self.node_count()
            ))
        })?;
        platform.available_memory(node.id)
    }

    /// Log the catalog at info level.
    pub fn log_topology(&self) {
        tracing::info!("NUMA topology: {} nodes", self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            tracing::info!(
                "  [{}] node {}: group {}, {} processors ({:#x})",
                index,
                node.id,
                node.affinity.group,
                node.affinity.processor_count(),
                node.affinity.mask
            );
        }
    }

    /// A short multi-line description of the catalog.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let mut s = format!("NUMA: {} nodes", self.nodes.len());
        for node in &self.nodes {
            let _ = write!(
                s,
                "\n  Node {}: group {}, {} processors",
                node.id,
                node.affinity.group,
                node.affinity.processor_count()
            );
        }
        s
    }
}
