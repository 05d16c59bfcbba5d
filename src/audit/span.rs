//! Page geometry of an audited address range.

use crate::error::{Error, Result};

/// The pages touched by a byte range `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    start_page: usize,
    end_page: usize,
    page_size: usize,
}

impl PageSpan {
    /// Compute the span of `len` bytes starting at `base`.
    ///
    /// Fails if `len` is zero, if `page_size` is not a power of two, or if
    /// the range wraps the address space.
    pub fn new(base: usize, len: usize, page_size: usize) -> Result<PageSpan> {
        if len == 0 {
            return Err(Error::InvalidArgument("cannot audit an empty range".into()));
        }
        if !page_size.is_power_of_two() {
            return Err(Error::InvalidArgument(format!("page size {} is not a power of two", page_size)));
        }
        let last = base.checked_add(len - 1).ok_or_else(|| {
            Error::InvalidArgument(format!("range {:#x}+{:#x} overflows the address space", base, len))
        })?;

        Ok(PageSpan {
            start_page: base / page_size,
            end_page: last / page_size,
            page_size,
        })
    }

    /// Index of the first page.
    #[inline]
    pub fn start_page(&self) -> usize {
        self.start_page
    }

    /// Index of the last page.
    #[inline]
    pub fn end_page(&self) -> usize {
        self.end_page
    }

    /// Number of pages; at least one.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }

    /// Page size used for the computation.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Address of the first byte of the first page.
    #[inline]
    pub fn start_address(&self) -> usize {
        self.start_page * self.page_size
    }

    /// Address of the last byte of the last page.
    #[inline]
    pub fn end_address_inclusive(&self) -> usize {
        self.end_page * self.page_size + (self.page_size - 1)
    }

    /// Address of the first byte of every page, ascending.
    pub fn page_addresses(&self) -> impl ExactSizeIterator<Item = usize> {
        let page_size = self.page_size;
        (self.start_page..self.end_page + 1).map(move |page| page * page_size)
    }
}
