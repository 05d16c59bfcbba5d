//! An in-memory machine model implementing [`Platform`].
//!
//! Thread affinity is tracked per OS thread, and a pinned thread is reported
//! as running on the lowest processor of its affinity set. Page attributes
//! are scripted with [`SimulatedPlatform::set_pages`]; pages never scripted
//! read back as non-resident. Individual queries can be made to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::audit::{PageAttribute, WorkingSetBuffer};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::topology::{GroupAffinity, ProcessorLocation};
use crate::utils::alignment;

const DEFAULT_PAGE_SIZE: usize = 4096;

// Error codes mirror the Windows ones the native backend would report.
const ERROR_INVALID_PARAMETER: i32 = 87;
const ERROR_GEN_FAILURE: i32 = 31;

/// Builder for [`SimulatedPlatform`].
#[derive(Debug, Clone)]
pub struct SimulatedPlatformBuilder {
    nodes: BTreeMap<u32, GroupAffinity>,
    secondary: Vec<(u32, GroupAffinity)>,
    memory: HashMap<u32, u64>,
    page_size: usize,
    idle_processor: ProcessorLocation,
}

impl SimulatedPlatformBuilder {
    /// Declare node `id` with processors `affinity`. Ids that are never
    /// declared but lie below the highest declared id have no processors.
    #[inline]
    pub fn node(mut self, id: u32, affinity: GroupAffinity) -> SimulatedPlatformBuilder {
        self.nodes.insert(id, affinity);
        self
    }

    /// Give node `id` further processors in another group. They are not part
    /// of the node's reported affinity but resolve to the node through
    /// [`Platform::node_of_processor`].
    #[inline]
    pub fn secondary_group(mut self, id: u32, affinity: GroupAffinity) -> SimulatedPlatformBuilder {
        self.secondary.push((id, affinity));
        self
    }

    /// Free memory reported for node `id`.
    #[inline]
    pub fn available_memory(mut self, id: u32, bytes: u64) -> SimulatedPlatformBuilder {
        self.memory.insert(id, bytes);
        self
    }

    /// Page size reported by the platform. Must be a power of two.
    #[inline]
    pub fn page_size(mut self, page_size: usize) -> SimulatedPlatformBuilder {
        self.page_size = page_size;
        self
    }

    /// Processor reported for threads that were never pinned.
    #[inline]
    pub fn idle_processor(mut self, location: ProcessorLocation) -> SimulatedPlatformBuilder {
        self.idle_processor = location;
        self
    }

    /// Build the platform.
    pub fn build(self) -> SimulatedPlatform {
        SimulatedPlatform {
            nodes: self.nodes,
            secondary: self.secondary,
            memory: self.memory,
            page_size: self.page_size,
            idle_processor: self.idle_processor,
            state: Mutex::new(State::default()),
            working_set_queries: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    pages: HashMap<usize, PageAttribute>,
    affinities: HashMap<ThreadId, GroupAffinity>,
    failing_nodes: HashSet<u32>,
    fail_working_set: bool,
    fail_set_affinity: bool,
    fail_current_processor: bool,
}

/// A simulated NUMA machine.
#[derive(Debug)]
pub struct SimulatedPlatform {
    nodes: BTreeMap<u32, GroupAffinity>,
    secondary: Vec<(u32, GroupAffinity)>,
    memory: HashMap<u32, u64>,
    page_size: usize,
    idle_processor: ProcessorLocation,
    state: Mutex<State>,
    working_set_queries: AtomicUsize,
}

impl SimulatedPlatform {
    /// Start describing a machine.
    pub fn builder() -> SimulatedPlatformBuilder {
        SimulatedPlatformBuilder {
            nodes: BTreeMap::new(),
            secondary: Vec::new(),
            memory: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            idle_processor: ProcessorLocation::new(0, 0),
        }
    }

    /// A machine with `count` nodes of `processors_per_node` processors each.
    ///
    /// Nodes share group 0 while all processors fit in one 64-bit mask;
    /// otherwise every node gets a group of its own.
    pub fn with_nodes(count: u32, processors_per_node: u32) -> SimulatedPlatform {
        let per_node = processors_per_node.min(64);
        let node_mask = if per_node == 64 { u64::MAX } else { (1u64 << per_node) - 1 };
        let shared_group = u64::from(count) * u64::from(per_node) <= 64;

        let mut builder = SimulatedPlatform::builder();
        for id in 0..count {
            let affinity = if shared_group {
                GroupAffinity::new(0, node_mask << (id * per_node))
            } else {
                GroupAffinity::new(id as u16, node_mask)
            };
            builder = builder.node(id, affinity);
        }
        builder.build()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script the attributes of consecutive pages starting at the page that
    /// contains `base`.
    pub fn set_pages(&self, base: usize, attributes: &[PageAttribute]) {
        let first = alignment::align_down(base, self.page_size);
        let mut state = self.state();
        for (i, attr) in attributes.iter().enumerate() {
            state.pages.insert(first + i * self.page_size, *attr);
        }
    }

    /// Make [`Platform::node_affinity`] fail for node `id`.
    pub fn fail_node_affinity(&self, id: u32) {
        self.state().failing_nodes.insert(id);
    }

    /// Make every working-set query fail.
    pub fn fail_working_set(&self) {
        self.state().fail_working_set = true;
    }

    /// Make every affinity change fail.
    pub fn fail_set_affinity(&self) {
        self.state().fail_set_affinity = true;
    }

    /// Make every current-processor query fail.
    pub fn fail_current_processor(&self) {
        self.state().fail_current_processor = true;
    }

    /// The affinity last set by the calling thread, if any.
    pub fn current_affinity(&self) -> Option<GroupAffinity> {
        self.state().affinities.get(&thread::current().id()).copied()
    }

    /// Number of working-set queries issued so far.
    pub fn working_set_queries(&self) -> usize {
        self.working_set_queries.load(Ordering::Relaxed)
    }
}

impl Platform for SimulatedPlatform {
    fn highest_node_number(&self) -> Result<u32> {
        Ok(self.nodes.keys().next_back().copied().unwrap_or(0))
    }

    fn node_affinity(&self, node: u32) -> Result<GroupAffinity> {
        if self.state().failing_nodes.contains(&node) {
            return Err(Error::from_code("GetNumaNodeProcessorMaskEx", ERROR_INVALID_PARAMETER));
        }
        Ok(self.nodes.get(&node).copied().unwrap_or_default())
    }

    fn current_processor(&self) -> Result<ProcessorLocation> {
        let state = self.state();
        if state.fail_current_processor {
            return Err(Error::from_code("GetCurrentProcessorNumberEx", ERROR_GEN_FAILURE));
        }

        let location = state
            .affinities
            .get(&thread::current().id())
            .and_then(|affinity| {
                affinity
                    .processors()
                    .next()
                    .map(|number| ProcessorLocation::new(affinity.group, number))
            })
            .unwrap_or(self.idle_processor);
        Ok(location)
    }

    fn node_of_processor(&self, location: ProcessorLocation) -> Option<u32> {
        self.secondary
            .iter()
            .find(|(_, affinity)| affinity.contains(location))
            .map(|&(id, _)| id)
    }

    fn set_current_thread_affinity(&self, affinity: &GroupAffinity) -> Result<()> {
        let mut state = self.state();
        if state.fail_set_affinity || affinity.is_empty() {
            return Err(Error::from_code("SetThreadGroupAffinity", ERROR_INVALID_PARAMETER));
        }
        state.affinities.insert(thread::current().id(), *affinity);
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn query_working_set(&self, buffer: &mut WorkingSetBuffer) -> Result<()> {
        self.working_set_queries.fetch_add(1, Ordering::Relaxed);

        let state = self.state();
        if state.fail_working_set {
            return Err(Error::from_code("QueryWorkingSetEx", ERROR_GEN_FAILURE));
        }

        let attributes: Vec<PageAttribute> = buffer
            .addresses()
            .map(|address| state.pages.get(&address).copied().unwrap_or(PageAttribute::INVALID))
            .collect();
        buffer.fill(attributes);
        Ok(())
    }

    fn available_memory(&self, node: u32) -> Result<u64> {
        match self.nodes.get(&node) {
            Some(_) => Ok(self.memory.get(&node).copied().unwrap_or(0)),
            None => Err(Error::from_code("GetNumaAvailableMemoryNodeEx", ERROR_INVALID_PARAMETER)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_nodes_layout() {
        let platform = SimulatedPlatform::with_nodes(2, 4);
        assert_eq!(platform.highest_node_number().unwrap(), 1);
        assert_eq!(platform.node_affinity(0).unwrap(), GroupAffinity::new(0, 0x0f));
        assert_eq!(platform.node_affinity(1).unwrap(), GroupAffinity::new(0, 0xf0));

        let wide = SimulatedPlatform::with_nodes(2, 48);
        assert_eq!(wide.node_affinity(1).unwrap(), GroupAffinity::new(1, (1 << 48) - 1));
    }

    #[test]
    fn test_affinity_is_per_thread() {
        let platform = SimulatedPlatform::with_nodes(2, 4);
        platform.set_current_thread_affinity(&GroupAffinity::new(0, 0xf0)).unwrap();
        assert_eq!(platform.current_processor().unwrap(), ProcessorLocation::new(0, 4));

        thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(platform.current_affinity(), None);
                assert_eq!(platform.current_processor().unwrap(), ProcessorLocation::new(0, 0));
            });
        });
    }

    #[test]
    fn test_empty_affinity_rejected() {
        let platform = SimulatedPlatform::with_nodes(1, 1);
        assert!(platform.set_current_thread_affinity(&GroupAffinity::new(0, 0)).is_err());
    }
}
