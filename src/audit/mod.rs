//! Page-level memory locality auditing.
//!
//! The auditor splits an address range into pages, asks the platform for the
//! working-set attributes of all of them in a single batched query, and
//! either checks that every page lives on a given node or coalesces the pages
//! into a [`LocalityReport`].
//!
//! ## Example
//!
//! ```
//! use numabind::platform::{simulated::SimulatedPlatform, Platform};
//! use numabind::{MemoryAuditor, PageAttribute};
//!
//! # fn main() -> numabind::Result<()> {
//! let platform = SimulatedPlatform::with_nodes(2, 4);
//! platform.set_pages(0x10_0000, &[PageAttribute::resident(1); 4]);
//! let len = 4 * platform.page_size();
//!
//! let auditor = MemoryAuditor::new(&platform);
//! assert!(auditor.is_resident_on_node(0x10_0000, len, 1)?);
//! println!("{}", auditor.describe(0x10_0000, len, "  ")?);
//! # Ok(())
//! # }
//! ```
//!
//! The auditor only observes placement; it never moves pages.

mod attribute;
mod region;
mod span;

pub use attribute::{PageAttribute, WorkingSetBuffer, WorkingSetEntry};
pub use region::{coalesce, LocalityReport, MemoryRegion};
pub use span::PageSpan;

use crate::error::Result;
use crate::platform::Platform;
use crate::utils::metrics::{self, Operation};

/// Audits the NUMA residency of address ranges.
#[derive(Debug)]
pub struct MemoryAuditor<'a, P: Platform + ?Sized> {
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> MemoryAuditor<'a, P> {
    /// Create an auditor querying `platform`.
    #[inline]
    pub fn new(platform: &'a P) -> MemoryAuditor<'a, P> {
        MemoryAuditor { platform }
    }

    /// Query the attributes of every page of `[address, address + len)`.
    pub fn query(&self, address: usize, len: usize) -> Result<WorkingSetBuffer> {
        let span = PageSpan::new(address, len, self.platform.page_size())?;
        let mut buffer = WorkingSetBuffer::for_span(&span);

        metrics::measure(Operation::Audit, span.page_count(), || {
            self.platform.query_working_set(&mut buffer)
        })?;

        tracing::trace!(
            start = span.start_address(),
            pages = span.page_count(),
            "queried working set"
        );
        Ok(buffer)
    }

    /// Returns `true` if every page of the range is resident on `node`.
    pub fn is_resident_on_node(&self, address: usize, len: usize, node: u32) -> Result<bool> {
        let buffer = self.query(address, len)?;
        Ok(buffer.entries().iter().all(|e| e.attributes.is_on_node(node)))
    }

    /// Coalesce the pages of the range into regions.
    pub fn regions(&self, address: usize, len: usize) -> Result<LocalityReport> {
        let buffer = self.query(address, len)?;
        Ok(LocalityReport::new(coalesce(buffer.entries(), buffer.page_size())))
    }

    /// Human-readable locality of the range, one line per region.
    pub fn describe(&self, address: usize, len: usize, indent: &str) -> Result<String> {
        self.regions(address, len).map(|report| report.render(indent))
    }

    /// [`is_resident_on_node`](Self::is_resident_on_node) over the memory of `data`.
    pub fn is_slice_resident_on_node<T>(&self, data: &[T], node: u32) -> Result<bool> {
        self.is_resident_on_node(data.as_ptr() as usize, std::mem::size_of_val(data), node)
    }

    /// [`regions`](Self::regions) over the memory of `data`.
    pub fn slice_regions<T>(&self, data: &[T]) -> Result<LocalityReport> {
        self.regions(data.as_ptr() as usize, std::mem::size_of_val(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::simulated::SimulatedPlatform;
    use crate::Error;

    const PAGE: usize = 4096;
    const BASE: usize = 0x0040_0000;

    fn platform_with(attrs: &[PageAttribute]) -> SimulatedPlatform {
        let platform = SimulatedPlatform::builder().page_size(PAGE).build();
        platform.set_pages(BASE, attrs);
        platform
    }

    #[test]
    fn test_resident_single_page() {
        let platform = platform_with(&[PageAttribute::resident(1)]);
        let auditor = MemoryAuditor::new(&platform);

        assert!(auditor.is_resident_on_node(BASE, PAGE, 1).unwrap());
        assert!(auditor.is_resident_on_node(BASE + 10, 100, 1).unwrap());
        assert!(!auditor.is_resident_on_node(BASE, PAGE, 0).unwrap());
    }

    #[test]
    fn test_mismatch_anywhere_fails() {
        for bad in [0, 4, 9] {
            let mut attrs = vec![PageAttribute::resident(2); 10];
            attrs[bad] = PageAttribute::resident(0);
            let platform = platform_with(&attrs);
            let auditor = MemoryAuditor::new(&platform);

            assert!(
                !auditor.is_resident_on_node(BASE, 10 * PAGE, 2).unwrap(),
                "mismatch at page {} not detected",
                bad
            );
        }
    }

    #[test]
    fn test_non_resident_page_fails() {
        let mut attrs = vec![PageAttribute::resident(0); 3];
        attrs[2] = PageAttribute::INVALID;
        let platform = platform_with(&attrs);
        let auditor = MemoryAuditor::new(&platform);

        assert!(!auditor.is_resident_on_node(BASE, 3 * PAGE, 0).unwrap());
        // node 0 bits on an invalid page must not count as node 0
        assert!(auditor.is_resident_on_node(BASE, 2 * PAGE, 0).unwrap());
    }

    #[test]
    fn test_single_batched_query() {
        let platform = platform_with(&[PageAttribute::resident(0); 64]);
        let auditor = MemoryAuditor::new(&platform);

        auditor.regions(BASE, 64 * PAGE).unwrap();
        assert_eq!(platform.working_set_queries(), 1);
    }

    #[test]
    fn test_describe_coalesces() {
        let platform = platform_with(&[
            PageAttribute::resident(0),
            PageAttribute::resident(0),
            PageAttribute::resident(1),
            PageAttribute::INVALID,
            PageAttribute::INVALID,
        ]);
        let auditor = MemoryAuditor::new(&platform);

        let report = auditor.regions(BASE, 5 * PAGE).unwrap();
        assert_eq!(report.regions().len(), 3);
        assert_eq!(report.regions()[2].end_inclusive, BASE + 5 * PAGE - 1);

        let text = auditor.describe(BASE, 5 * PAGE, "> ").unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "> [00400000-00401FFF] (000002 pages) -> Node=0",
                "> [00402000-00402FFF] (000001 pages) -> Node=1",
                "> [00403000-00404FFF] (000002 pages) -> No valid pages",
            ]
        );
    }

    #[test]
    fn test_unaligned_range_covers_partial_pages() {
        let platform = platform_with(&[PageAttribute::resident(0), PageAttribute::resident(1)]);
        let auditor = MemoryAuditor::new(&platform);

        // last byte of page 0 and first byte of page 1
        let report = auditor.regions(BASE + PAGE - 1, 2).unwrap();
        assert_eq!(report.page_count(), 2);
        assert_eq!(report.regions()[0].start, BASE);
        assert_eq!(report.regions()[1].end_inclusive, BASE + 2 * PAGE - 1);
    }

    #[test]
    fn test_query_failure_propagates() {
        let platform = platform_with(&[PageAttribute::resident(0)]);
        platform.fail_working_set();
        let auditor = MemoryAuditor::new(&platform);

        let err = auditor.is_resident_on_node(BASE, PAGE, 0).unwrap_err();
        assert!(err.is_platform_query());
    }

    #[test]
    fn test_empty_range_rejected() {
        let platform = platform_with(&[]);
        let auditor = MemoryAuditor::new(&platform);
        assert!(matches!(auditor.regions(BASE, 0), Err(Error::InvalidArgument(_))));
        let empty: [u64; 0] = [];
        assert!(auditor.slice_regions(&empty).is_err());
    }
}
