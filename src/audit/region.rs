//! Coalescing of per-page attributes into locality regions.

use std::fmt;

use super::attribute::WorkingSetEntry;

/// A run of consecutive pages with the same residency and owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Address of the first byte of the first page.
    pub start: usize,

    /// Address of the last byte of the last page.
    pub end_inclusive: usize,

    /// Number of pages in the run.
    pub pages: usize,

    /// Whether the pages are resident.
    pub valid: bool,

    /// Owning node; meaningless when `valid` is false. The node bits of
    /// non-resident pages are reserved, so they never split a region.
    pub node: u32,
}

impl MemoryRegion {
    /// Size of the region in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.end_inclusive - self.start + 1
    }

    /// Returns `true` if the region is resident on `node`.
    #[inline]
    pub fn is_on_node(&self, node: u32) -> bool {
        self.valid && self.node == node
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:08X}-{:08X}] ({:06} pages) -> ", self.start, self.end_inclusive, self.pages)?;
        if self.valid {
            write!(f, "Node={}", self.node)
        } else {
            f.write_str("No valid pages")
        }
    }
}

/// Merge consecutive pages into regions.
///
/// A new region starts whenever residency changes or, for resident pages,
/// the owning node changes. Non-resident pages are grouped regardless of
/// the node bits they carry. The last region always extends to the last
/// byte of the final page.
pub fn coalesce(entries: &[WorkingSetEntry], page_size: usize) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();
    let mut current: Option<MemoryRegion> = None;

    for entry in entries {
        let attr = entry.attributes;
        let key = attr.resident_node();

        match current.as_mut() {
            Some(region) if key == region_key(region) => {
                region.pages += 1;
                region.end_inclusive = entry.virtual_address + (page_size - 1);
            }
            _ => {
                if let Some(done) = current.take() {
                    regions.push(done);
                }
                current = Some(MemoryRegion {
                    start: entry.virtual_address,
                    end_inclusive: entry.virtual_address + (page_size - 1),
                    pages: 1,
                    valid: attr.valid(),
                    node: if attr.valid() { attr.node() } else { 0 },
                });
            }
        }
    }

    if let Some(done) = current {
        regions.push(done);
    }

    regions
}

#[inline]
fn region_key(region: &MemoryRegion) -> Option<u32> {
    if region.valid {
        Some(region.node)
    } else {
        None
    }
}

/// The coalesced locality of an address range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalityReport {
    regions: Vec<MemoryRegion>,
}

impl LocalityReport {
    /// Build a report from regions in ascending address order.
    pub fn new(regions: Vec<MemoryRegion>) -> LocalityReport {
        LocalityReport { regions }
    }

    /// The regions in ascending address order.
    #[inline]
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Total number of pages covered.
    pub fn page_count(&self) -> usize {
        self.regions.iter().map(|r| r.pages).sum()
    }

    /// Number of resident pages.
    pub fn resident_pages(&self) -> usize {
        self.regions.iter().filter(|r| r.valid).map(|r| r.pages).sum()
    }

    /// Number of resident pages owned by `node`.
    pub fn pages_on_node(&self, node: u32) -> usize {
        self.regions.iter().filter(|r| r.is_on_node(node)).map(|r| r.pages).sum()
    }

    /// Returns `true` if every page is resident on `node`.
    pub fn is_resident_on(&self, node: u32) -> bool {
        !self.regions.is_empty() && self.regions.iter().all(|r| r.is_on_node(node))
    }

    /// One line per region, each prefixed with `indent`.
    pub fn render(&self, indent: &str) -> String {
        self.regions
            .iter()
            .map(|r| format!("{}{}", indent, r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for LocalityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(""))
    }
}
