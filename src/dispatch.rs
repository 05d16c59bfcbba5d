//! Worker-to-node assignment and thread pinning.
//!
//! Worker indices are mapped round-robin onto the catalog, or through a
//! caller-supplied [`DispatchTemplate`]. Index arithmetic never fails:
//! negative indices clamp to zero and everything wraps modulo the effective
//! length.
//!
//! ## Example
//!
//! ```
//! use numabind::platform::simulated::SimulatedPlatform;
//! use numabind::{AffinityDispatcher, TopologyCatalog};
//!
//! # fn main() -> numabind::Result<()> {
//! let platform = SimulatedPlatform::with_nodes(2, 4);
//! let catalog = TopologyCatalog::discover(&platform)?;
//!
//! let mut dispatcher = AffinityDispatcher::new(&catalog, &platform)?;
//! // send workers 0, 1 and 2 to node 1, node 1, node 0
//! dispatcher.set_dispatch_template(&[1, 1, 0])?;
//!
//! let node = dispatcher.pin_current_thread(0)?;
//! assert_eq!(node.id, 1);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::topology::{NumaNode, TopologyCatalog};
use crate::utils::metrics::{self, Operation};

/// Normalised worker-slot to catalog-index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTemplate {
    slots: Vec<usize>,
}

impl DispatchTemplate {
    /// Normalise raw entries against `node_count` nodes.
    ///
    /// Each entry is clamped to zero first and then reduced modulo
    /// `node_count`, so `-5` maps to `0` whatever the node count.
    pub fn normalize(entries: &[i64], node_count: usize) -> Result<DispatchTemplate> {
        if node_count == 0 {
            return Err(Error::NoNodes);
        }
        if entries.is_empty() {
            return Err(Error::InvalidArgument("dispatch template is empty".into()));
        }

        let slots = entries
            .iter()
            .map(|&entry| wrap(entry, node_count))
            .collect();
        Ok(DispatchTemplate { slots })
    }

    /// Number of worker slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always `false`; an empty template cannot be built.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Catalog index for worker slot `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).copied()
    }

    /// The normalised catalog indices.
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.slots
    }
}

/// Clamp-then-modulo reduction of `value` into `0..len`. `len` is non-zero.
#[inline]
fn wrap(value: i64, len: usize) -> usize {
    (value.max(0) as u64 % len as u64) as usize
}

/// Assigns workers to NUMA nodes and pins the calling thread.
///
/// The template can only be changed through `&mut self`, so it cannot
/// change while other threads dispatch through a shared reference.
#[derive(Debug)]
pub struct AffinityDispatcher<'a, P: Platform + ?Sized> {
    catalog: &'a TopologyCatalog,
    platform: &'a P,
    template: Option<DispatchTemplate>,
}

impl<'a, P: Platform + ?Sized> AffinityDispatcher<'a, P> {
    /// Create a dispatcher with direct round-robin mapping.
    ///
    /// Fails with [`Error::NoNodes`] if the catalog is empty.
    pub fn new(catalog: &'a TopologyCatalog, platform: &'a P) -> Result<AffinityDispatcher<'a, P>> {
        if catalog.is_empty() {
            return Err(Error::NoNodes);
        }
        Ok(AffinityDispatcher {
            catalog,
            platform,
            template: None,
        })
    }

    /// Builder-style [`set_dispatch_template`](Self::set_dispatch_template).
    pub fn with_template(mut self, entries: &[i64]) -> Result<AffinityDispatcher<'a, P>> {
        self.set_dispatch_template(entries)?;
        Ok(self)
    }

    /// Replace the dispatch template with a normalised copy of `entries`.
    pub fn set_dispatch_template(&mut self, entries: &[i64]) -> Result<&DispatchTemplate> {
        let template = DispatchTemplate::normalize(entries, self.catalog.node_count())?;
        tracing::debug!(slots = ?template.as_slice(), "dispatch template set");
        let template = self.template.insert(template);
        Ok(&*template)
    }

    /// Return to direct round-robin mapping.
    pub fn clear_dispatch_template(&mut self) {
        self.template = None;
    }

    /// The active template, if any.
    #[inline]
    pub fn template(&self) -> Option<&DispatchTemplate> {
        self.template.as_ref()
    }

    /// The catalog this dispatcher assigns from.
    #[inline]
    pub fn catalog(&self) -> &'a TopologyCatalog {
        self.catalog
    }

    /// Number of distinct worker slots before assignments repeat.
    #[inline]
    pub fn effective_len(&self) -> usize {
        self.template.as_ref().map_or(self.catalog.node_count(), DispatchTemplate::len)
    }

    /// Catalog index assigned to `worker_index`.
    pub fn catalog_index(&self, worker_index: i64) -> usize {
        let slot = wrap(worker_index, self.effective_len());
        match &self.template {
            // normalisation keeps every slot in range
            Some(template) => template.slots[slot],
            None => slot,
        }
    }

    /// Node assigned to `worker_index`.
    pub fn select(&self, worker_index: i64) -> &'a NumaNode {
        let catalog: &'a TopologyCatalog = self.catalog;
        &catalog.nodes()[self.catalog_index(worker_index)]
    }

    /// Restrict the calling thread to the processors of the node assigned to
    /// `worker_index` and return that node.
    ///
    /// The thread's previous affinity is discarded.
    pub fn pin_current_thread(&self, worker_index: i64) -> Result<&'a NumaNode> {
        let node = self.select(worker_index);

        metrics::measure(Operation::Pin, 0, || {
            self.platform.set_current_thread_affinity(&node.affinity)
        })?;

        tracing::debug!(
            worker = worker_index,
            node = node.id,
            group = node.affinity.group,
            mask = node.affinity.mask,
            "pinned thread"
        );
        Ok(node)
    }
}
