//! Page alignment utilities.

/// Round down to the previous multiple of `align`.
///
/// # Arguments
///
/// * `value` - The value to round down.
/// * `align` - The alignment, which must be a power of two.
///
/// # Returns
///
/// The largest multiple of `align` that is less than or equal to `value`.
#[inline]
pub fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value & !(align - 1)
}

/// Check if a value is aligned to a given alignment.
///
/// # Arguments
///
/// * `value` - The value to check.
/// * `align` - The alignment, which must be a power of two.
///
/// # Returns
///
/// `true` if `value` is a multiple of `align`, `false` otherwise.
#[inline]
pub fn is_aligned(value: usize, align: usize) -> bool {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    (value & (align - 1)) == 0
}

/// Get the system page size.
#[inline]
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

        unsafe {
            let mut system_info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut system_info);
            system_info.dwPageSize as usize
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Default to 4KB for unknown platforms
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
        assert_eq!(align_down(0x2000, 0x1000), 0x2000);
        assert!(is_aligned(0x3000, 0x1000));
        assert!(!is_aligned(0x3001, 0x1000));
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}
