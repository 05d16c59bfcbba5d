//! Per-page working-set attribute words.
//!
//! The attribute word follows the working-set block layout:
//!
//! | Bits  | Field             |
//! |-------|-------------------|
//! | 0     | valid (resident)  |
//! | 1-3   | share count       |
//! | 4-14  | win32 protection  |
//! | 15    | shared            |
//! | 16-21 | NUMA node         |
//! | 22    | locked            |
//! | 23    | large page        |
//! | 63    | bad               |
//!
//! Only `valid` and `node` take part in locality decisions. Backends that do
//! not natively produce this word (Linux) synthesize it from what the kernel
//! reports.

use std::fmt;

use super::span::PageSpan;

const VALID_BIT: u64 = 1 << 0;
const SHARE_COUNT_SHIFT: u32 = 1;
const SHARE_COUNT_MASK: u64 = 0x7;
const PROTECTION_SHIFT: u32 = 4;
const PROTECTION_MASK: u64 = 0x7ff;
const SHARED_BIT: u64 = 1 << 15;
const NODE_SHIFT: u32 = 16;
const NODE_MASK: u64 = 0x3f;
const LOCKED_BIT: u64 = 1 << 22;
const LARGE_PAGE_BIT: u64 = 1 << 23;
const BAD_BIT: u64 = 1 << 63;

/// A decoded view over a raw page attribute word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct PageAttribute(u64);

impl PageAttribute {
    /// A non-resident page.
    pub const INVALID: PageAttribute = PageAttribute(0);

    /// Highest node id representable in the node field.
    pub const MAX_NODE: u32 = NODE_MASK as u32;

    /// Wrap a raw attribute word.
    #[inline]
    pub const fn from_raw(raw: u64) -> PageAttribute {
        PageAttribute(raw)
    }

    /// A resident page owned by `node`.
    ///
    /// Node ids above [`Self::MAX_NODE`] are truncated to the 6-bit field.
    #[inline]
    pub const fn resident(node: u32) -> PageAttribute {
        PageAttribute(VALID_BIT | ((node as u64 & NODE_MASK) << NODE_SHIFT))
    }

    /// The raw attribute word.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether the page is resident.
    #[inline]
    pub const fn valid(self) -> bool {
        self.0 & VALID_BIT != 0
    }

    /// NUMA node owning the page. Only meaningful when [`valid`](Self::valid).
    #[inline]
    pub const fn node(self) -> u32 {
        ((self.0 >> NODE_SHIFT) & NODE_MASK) as u32
    }

    /// The owning node, or `None` for a non-resident page.
    #[inline]
    pub const fn resident_node(self) -> Option<u32> {
        if self.valid() {
            Some(self.node())
        } else {
            None
        }
    }

    /// Number of processes sharing the page (saturates at 7).
    #[inline]
    pub const fn share_count(self) -> u8 {
        ((self.0 >> SHARE_COUNT_SHIFT) & SHARE_COUNT_MASK) as u8
    }

    /// Page protection bits.
    #[inline]
    pub const fn protection(self) -> u16 {
        ((self.0 >> PROTECTION_SHIFT) & PROTECTION_MASK) as u16
    }

    /// Whether the page can be shared.
    #[inline]
    pub const fn shared(self) -> bool {
        self.0 & SHARED_BIT != 0
    }

    /// Whether the page is locked in physical memory.
    #[inline]
    pub const fn locked(self) -> bool {
        self.0 & LOCKED_BIT != 0
    }

    /// Whether the page is a large page.
    #[inline]
    pub const fn large_page(self) -> bool {
        self.0 & LARGE_PAGE_BIT != 0
    }

    /// Whether the page is reported as bad.
    #[inline]
    pub const fn bad(self) -> bool {
        self.0 & BAD_BIT != 0
    }

    /// Returns `true` if the page is resident on `node`.
    #[inline]
    pub const fn is_on_node(self, node: u32) -> bool {
        self.valid() && self.node() == node
    }
}

impl fmt::Debug for PageAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageAttribute")
            .field("raw", &format_args!("{:#018x}", self.0))
            .field("valid", &self.valid())
            .field("node", &self.node())
            .finish()
    }
}

/// One page of a working-set query: the page address and its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkingSetEntry {
    /// Address of the first byte of the page.
    pub virtual_address: usize,

    /// Attributes reported for the page.
    pub attributes: PageAttribute,
}

/// The request/response buffer of a batched working-set query.
///
/// Built for a whole [`PageSpan`] with every attribute cleared; a platform
/// backend fills in the attributes with a single query.
#[derive(Debug, Clone)]
pub struct WorkingSetBuffer {
    entries: Vec<WorkingSetEntry>,
    page_size: usize,
}

impl WorkingSetBuffer {
    /// Allocate one entry per page of `span`.
    pub fn for_span(span: &PageSpan) -> WorkingSetBuffer {
        let entries = span
            .page_addresses()
            .map(|virtual_address| WorkingSetEntry {
                virtual_address,
                attributes: PageAttribute::INVALID,
            })
            .collect();

        WorkingSetBuffer {
            entries,
            page_size: span.page_size(),
        }
    }

    /// Number of pages in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the buffer covers no page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Page size the buffer was built with.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The entry for page `index` of the span.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&WorkingSetEntry> {
        self.entries.get(index)
    }

    /// All entries in ascending address order.
    #[inline]
    pub fn entries(&self) -> &[WorkingSetEntry] {
        &self.entries
    }

    /// Page addresses in ascending order.
    pub fn addresses(&self) -> impl ExactSizeIterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.virtual_address)
    }

    /// Store the attributes of page `index`.
    ///
    /// Returns `false` if `index` is outside the buffer.
    #[inline]
    pub fn set_attribute(&mut self, index: usize, attributes: PageAttribute) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.attributes = attributes;
                true
            }
            None => false,
        }
    }

    /// Store the attributes of every page, in order.
    ///
    /// Extra attributes are ignored; missing ones leave pages untouched.
    pub fn fill<I>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = PageAttribute>,
    {
        for (entry, attributes) in self.entries.iter_mut().zip(attributes) {
            entry.attributes = attributes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_and_node() {
        let attr = PageAttribute::from_raw(0x0003_0001);
        assert!(attr.valid());
        assert_eq!(attr.node(), 3);
        assert_eq!(attr.resident_node(), Some(3));

        // node bits set but page not resident
        let attr = PageAttribute::from_raw(0x0005_0000);
        assert!(!attr.valid());
        assert_eq!(attr.node(), 5);
        assert_eq!(attr.resident_node(), None);
        assert!(!attr.is_on_node(5));
    }

    #[test]
    fn test_node_field_is_six_bits() {
        // bit 22 (locked) must not leak into the node id
        let attr = PageAttribute::from_raw((0x3f << 16) | LOCKED_BIT | VALID_BIT);
        assert_eq!(attr.node(), 63);
        assert!(attr.locked());
        assert_eq!(PageAttribute::resident(64 + 2).node(), 2);
    }

    #[test]
    fn test_remaining_fields() {
        let raw = VALID_BIT | (5 << SHARE_COUNT_SHIFT) | (0x04 << PROTECTION_SHIFT) | SHARED_BIT | LARGE_PAGE_BIT | BAD_BIT;
        let attr = PageAttribute::from_raw(raw);
        assert_eq!(attr.share_count(), 5);
        assert_eq!(attr.protection(), 0x04);
        assert!(attr.shared());
        assert!(attr.large_page());
        assert!(attr.bad());
        assert!(!attr.locked());
        assert_eq!(attr.node(), 0);
    }

    #[test]
    fn test_buffer_for_span() {
        let span = PageSpan::new(0x1_0800, 0x2000, 0x1000).unwrap();
        let mut buffer = WorkingSetBuffer::for_span(&span);

        let addresses: Vec<usize> = buffer.addresses().collect();
        assert_eq!(addresses, vec![0x1_0000, 0x1_1000, 0x1_2000]);
        assert!(buffer.entries().iter().all(|e| !e.attributes.valid()));

        assert!(buffer.set_attribute(2, PageAttribute::resident(1)));
        assert!(!buffer.set_attribute(3, PageAttribute::resident(1)));
        assert_eq!(buffer.get(2).map(|e| e.attributes.node()), Some(1));
        assert_eq!(buffer.page_size(), 0x1000);
    }
}
