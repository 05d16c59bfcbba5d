//! Windows-specific NUMA queries.

use std::mem;

use winapi::ctypes::c_void;
use winapi::shared::minwindef::{DWORD, ULONG, USHORT};
use winapi::um::processthreadsapi::{GetCurrentProcess, GetCurrentProcessorNumberEx, GetCurrentThread};
use winapi::um::processtopologyapi::SetThreadGroupAffinity;
use winapi::um::psapi::QueryWorkingSetEx;
use winapi::um::systemtopologyapi::{GetNumaHighestNodeNumber, GetNumaNodeProcessorMaskEx};
use winapi::um::winbase::GetNumaAvailableMemoryNodeEx;
use winapi::um::winnt::{GROUP_AFFINITY, PROCESSOR_NUMBER};

use crate::audit::{PageAttribute, WorkingSetBuffer};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::topology::{GroupAffinity, ProcessorLocation};
use crate::utils::alignment;

/// Layout of `PSAPI_WORKING_SET_EX_INFORMATION`.
#[repr(C)]
struct WorkingSetExInformation {
    virtual_address: *mut c_void,
    virtual_attributes: usize,
}

/// NUMA backend for Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    /// Query the live system.
    #[inline]
    pub fn new() -> WindowsPlatform {
        WindowsPlatform
    }
}

fn node_number(node: u32) -> Result<USHORT> {
    USHORT::try_from(node).map_err(|_| Error::InvalidArgument(format!("node {} out of range", node)))
}

impl Platform for WindowsPlatform {
    fn highest_node_number(&self) -> Result<u32> {
        let mut highest: ULONG = 0;
        if unsafe { GetNumaHighestNodeNumber(&mut highest) } == 0 {
            return Err(Error::last_os_error("GetNumaHighestNodeNumber"));
        }
        Ok(highest)
    }

    fn node_affinity(&self, node: u32) -> Result<GroupAffinity> {
        let node = node_number(node)?;
        let mut affinity: GROUP_AFFINITY = unsafe { mem::zeroed() };
        if unsafe { GetNumaNodeProcessorMaskEx(node, &mut affinity) } == 0 {
            return Err(Error::last_os_error("GetNumaNodeProcessorMaskEx"));
        }
        Ok(GroupAffinity::new(affinity.Group, affinity.Mask as u64))
    }

    fn current_processor(&self) -> Result<ProcessorLocation> {
        let mut number: PROCESSOR_NUMBER = unsafe { mem::zeroed() };
        unsafe { GetCurrentProcessorNumberEx(&mut number) };
        Ok(ProcessorLocation::new(number.Group, number.Number))
    }

    fn set_current_thread_affinity(&self, affinity: &GroupAffinity) -> Result<()> {
        let mut requested: GROUP_AFFINITY = unsafe { mem::zeroed() };
        requested.Group = affinity.group;
        requested.Mask = affinity.mask as usize;

        // the previous affinity is required by the API but not kept
        let mut previous: GROUP_AFFINITY = unsafe { mem::zeroed() };
        if unsafe { SetThreadGroupAffinity(GetCurrentThread(), &requested, &mut previous) } == 0 {
            return Err(Error::last_os_error("SetThreadGroupAffinity"));
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        alignment::page_size()
    }

    fn query_working_set(&self, buffer: &mut WorkingSetBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let mut info: Vec<WorkingSetExInformation> = buffer
            .addresses()
            .map(|address| WorkingSetExInformation {
                virtual_address: address as *mut c_void,
                virtual_attributes: 0,
            })
            .collect();

        let bytes = DWORD::try_from(info.len() * mem::size_of::<WorkingSetExInformation>()).map_err(|_| {
            Error::InvalidArgument(format!("{} pages exceed a single working-set query", info.len()))
        })?;

        let ok = unsafe { QueryWorkingSetEx(GetCurrentProcess(), info.as_mut_ptr() as *mut c_void, bytes) };
        if ok == 0 {
            return Err(Error::last_os_error("QueryWorkingSetEx"));
        }

        buffer.fill(info.iter().map(|entry| PageAttribute::from_raw(entry.virtual_attributes as u64)));
        Ok(())
    }

    fn available_memory(&self, node: u32) -> Result<u64> {
        let node = node_number(node)?;
        let mut bytes: u64 = 0;
        if unsafe { GetNumaAvailableMemoryNodeEx(node, &mut bytes) } == 0 {
            return Err(Error::last_os_error("GetNumaAvailableMemoryNodeEx"));
        }
        Ok(bytes)
    }
}
