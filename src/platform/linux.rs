//! Linux-specific NUMA queries.
//!
//! Topology comes from sysfs, the current processor from `sched_getcpu`,
//! affinity is set with `sched_setaffinity`, and page placement is read
//! with `move_pages(2)` in query mode (no target nodes). Kernels built
//! without NUMA support answer `ENOSYS` to `move_pages`; there residency is
//! taken from `mincore(2)` and every resident page is attributed to node 0.
//!
//! Processor groups are synthesised per node (see `ProcessorMap`). Pinning
//! to a node's primary affinity pins to every CPU of the node, even when the
//! node needs more than one group.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::OnceLock;

use libc::{c_int, c_ulong, c_void, cpu_set_t, CPU_SET, CPU_SETSIZE, CPU_ZERO};

use crate::audit::{PageAttribute, WorkingSetBuffer};
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::topology::{GroupAffinity, ProcessorLocation};
use crate::utils::alignment;

const SYSFS_ROOT: &str = "/sys/devices/system";
const PROC_MEMINFO: &str = "/proc/meminfo";

/// Processors per affinity group.
const GROUP_WIDTH: usize = 64;

/// Processor groups derived from the node CPU lists.
///
/// Linux has no processor groups. Each node's CPUs, ascending, are split
/// into runs of 64 and every run gets the next free group number, so a group
/// never straddles two nodes and bit `n` of a group mask is the `n`-th CPU
/// of that run. A node's first group is its primary group.
#[derive(Debug, Clone, Default)]
struct ProcessorMap {
    groups: Vec<ProcessorGroup>,
    by_cpu: HashMap<usize, ProcessorLocation>,
}

#[derive(Debug, Clone)]
struct ProcessorGroup {
    node: u32,
    cpus: Vec<usize>,
}

impl ProcessorMap {
    fn build(nodes: impl IntoIterator<Item = (u32, Vec<usize>)>) -> ProcessorMap {
        let mut map = ProcessorMap::default();

        for (node, mut cpus) in nodes {
            cpus.sort_unstable();
            cpus.dedup();
            for run in cpus.chunks(GROUP_WIDTH) {
                let group = map.groups.len() as u16;
                for (number, &cpu) in run.iter().enumerate() {
                    map.by_cpu.insert(cpu, ProcessorLocation::new(group, number as u8));
                }
                map.groups.push(ProcessorGroup {
                    node,
                    cpus: run.to_vec(),
                });
            }
        }

        map
    }

    /// Primary group of `node` with every processor of that group set.
    fn primary_affinity(&self, node: u32) -> GroupAffinity {
        self.groups
            .iter()
            .position(|g| g.node == node)
            .map(|index| GroupAffinity::new(index as u16, full_mask(self.groups[index].cpus.len())))
            .unwrap_or_default()
    }

    fn location(&self, cpu: usize) -> ProcessorLocation {
        self.by_cpu.get(&cpu).copied().unwrap_or_else(|| {
            // CPUs onlined after the map was built land past the mapped groups
            ProcessorLocation::new(
                (self.groups.len() + cpu / GROUP_WIDTH) as u16,
                (cpu % GROUP_WIDTH) as u8,
            )
        })
    }

    fn node_of(&self, location: ProcessorLocation) -> Option<u32> {
        let group = self.groups.get(location.group as usize)?;
        group.cpus.get(location.number as usize).map(|_| group.node)
    }

    /// Kernel CPU numbers selected by `affinity`.
    ///
    /// A node's primary affinity selects every CPU of the node, including
    /// those in its later groups.
    fn cpus(&self, affinity: &GroupAffinity) -> Vec<usize> {
        let group = match self.groups.get(affinity.group as usize) {
            Some(group) => group,
            None => return Vec::new(),
        };

        if *affinity == self.primary_affinity(group.node) {
            return self
                .groups
                .iter()
                .filter(|g| g.node == group.node)
                .flat_map(|g| g.cpus.iter().copied())
                .collect();
        }

        affinity
            .processors()
            .filter_map(|number| group.cpus.get(number as usize).copied())
            .collect()
    }
}

#[inline]
fn full_mask(len: usize) -> u64 {
    if len >= GROUP_WIDTH {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

/// NUMA backend for Linux.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    root: PathBuf,
    map: OnceLock<ProcessorMap>,
}

impl Default for LinuxPlatform {
    fn default() -> LinuxPlatform {
        LinuxPlatform::new()
    }
}

impl LinuxPlatform {
    /// Query the live system.
    #[inline]
    pub fn new() -> LinuxPlatform {
        LinuxPlatform::with_sysfs_root(SYSFS_ROOT)
    }

    /// Read topology from a directory laid out like `/sys/devices/system`.
    #[inline]
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> LinuxPlatform {
        LinuxPlatform {
            root: root.into(),
            map: OnceLock::new(),
        }
    }

    /// The processor groups, read from sysfs on first use.
    fn processor_map(&self) -> Result<&ProcessorMap> {
        if let Some(map) = self.map.get() {
            return Ok(map);
        }

        let highest = self.highest_node_number()?;
        let nodes = (0..=highest)
            .map(|id| Ok((id, self.node_cpus(id)?)))
            .collect::<Result<Vec<_>>>()?;
        let map = ProcessorMap::build(nodes);
        tracing::debug!(groups = map.groups.len(), cpus = map.by_cpu.len(), "derived processor groups");

        Ok(self.map.get_or_init(|| map))
    }

    fn node_dir(&self) -> PathBuf {
        self.root.join("node")
    }

    fn has_node_dir(&self) -> bool {
        self.node_dir().is_dir()
    }

    /// CPUs of node `node`, or every online CPU of node 0 on systems without
    /// a node directory.
    fn node_cpus(&self, node: u32) -> Result<Vec<usize>> {
        if !self.has_node_dir() {
            if node != 0 {
                return Ok(Vec::new());
            }
            return match read_optional(&self.root.join("cpu").join("online"))? {
                Some(online) => Ok(parse_cpulist(online.trim())),
                None => {
                    let count = std::thread::available_parallelism().map_or(1, |n| n.get());
                    Ok((0..count).collect())
                }
            };
        }

        let path = self.node_dir().join(format!("node{}", node)).join("cpulist");
        Ok(read_optional(&path)?
            .map(|list| parse_cpulist(list.trim()))
            .unwrap_or_default())
    }

    /// Fallback for kernels without NUMA: residency only, all on node 0.
    fn query_residency(&self, buffer: &mut WorkingSetBuffer) -> Result<()> {
        let start = match buffer.get(0) {
            Some(entry) => entry.virtual_address,
            None => return Ok(()),
        };
        debug_assert!(alignment::is_aligned(start, buffer.page_size()));

        let mut residency = vec![0u8; buffer.len()];
        let len = buffer.len() * buffer.page_size();
        let rc = unsafe { libc::mincore(start as *mut c_void, len, residency.as_mut_ptr()) };
        if rc != 0 {
            return Err(Error::last_os_error("mincore"));
        }

        buffer.fill(residency.iter().map(|&flags| {
            if flags & 0x01 != 0 {
                PageAttribute::resident(0)
            } else {
                PageAttribute::INVALID
            }
        }));
        Ok(())
    }
}

impl Platform for LinuxPlatform {
    fn highest_node_number(&self) -> Result<u32> {
        if !self.has_node_dir() {
            return Ok(0);
        }

        if let Some(possible) = read_optional(&self.node_dir().join("possible"))? {
            return Ok(parse_cpulist(possible.trim()).into_iter().max().unwrap_or(0) as u32);
        }

        // older kernels: scan nodeN directories
        let entries = fs::read_dir(self.node_dir()).map_err(|e| Error::from_os_error("read_dir", &e))?;
        let mut highest = 0;
        for entry in entries {
            let entry = entry.map_err(|e| Error::from_os_error("read_dir", &e))?;
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_prefix("node")).and_then(|n| n.parse::<u32>().ok()) {
                highest = highest.max(id);
            }
        }
        Ok(highest)
    }

    fn node_affinity(&self, node: u32) -> Result<GroupAffinity> {
        Ok(self.processor_map()?.primary_affinity(node))
    }

    fn current_processor(&self) -> Result<ProcessorLocation> {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            return Err(Error::last_os_error("sched_getcpu"));
        }
        Ok(self.processor_map()?.location(cpu as usize))
    }

    fn node_of_processor(&self, location: ProcessorLocation) -> Option<u32> {
        self.processor_map().ok()?.node_of(location)
    }

    fn set_current_thread_affinity(&self, affinity: &GroupAffinity) -> Result<()> {
        let cpus = self.processor_map()?.cpus(affinity);
        if cpus.is_empty() {
            return Err(Error::InvalidArgument(format!("affinity {} selects no online processor", affinity)));
        }

        unsafe {
            let mut set: cpu_set_t = mem::zeroed();
            CPU_ZERO(&mut set);

            for cpu in cpus {
                if cpu >= CPU_SETSIZE as usize {
                    return Err(Error::InvalidArgument(format!(
                        "processor {} exceeds the {} CPUs a cpu_set_t can hold",
                        cpu, CPU_SETSIZE
                    )));
                }
                CPU_SET(cpu, &mut set);
            }

            // pid 0 is the calling thread
            if libc::sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &set) != 0 {
                return Err(Error::last_os_error("sched_setaffinity"));
            }
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

        let pages: Vec<*mut c_void> = buffer.addresses().map(|address| address as *mut c_void).collect();
        let mut status: Vec<c_int> = vec![-libc::ENOENT; pages.len()];

        // A null node list turns move_pages into a pure placement query.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_move_pages,
                0 as c_int,
                pages.len() as c_ulong,
                pages.as_ptr(),
                ptr::null::<c_int>(),
                status.as_mut_ptr(),
                0 as c_int,
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOSYS) {
                tracing::debug!("move_pages unavailable, falling back to mincore");
                return self.query_residency(buffer);
            }
            return Err(Error::from_os_error("move_pages", &err));
        }

        // negative status: -ENOENT (not faulted in), -EFAULT (unmapped), ...
        buffer.fill(status.iter().map(|&node| {
            if node >= 0 {
                PageAttribute::resident(node as u32)
            } else {
                PageAttribute::INVALID
            }
        }));
        Ok(())
    }

    fn available_memory(&self, node: u32) -> Result<u64> {
        if self.has_node_dir() {
            let path = self.node_dir().join(format!("node{}", node)).join("meminfo");
            let meminfo = fs::read_to_string(&path).map_err(|e| Error::from_os_error("read node meminfo", &e))?;
            return Ok(parse_meminfo(&meminfo, "MemFree:"));
        }

        if node != 0 {
            return Err(Error::from_code("read node meminfo", libc::ENOENT));
        }
        let meminfo = fs::read_to_string(PROC_MEMINFO).map_err(|e| Error::from_os_error("read /proc/meminfo", &e))?;
        Ok(parse_meminfo(&meminfo, "MemAvailable:"))
    }
}

/// Read a sysfs file, mapping "does not exist" to `None`.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::from_os_error("read sysfs", &e)),
    }
}

/// Parse a CPU list string like "0-7,16-23".
fn parse_cpulist(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }

    cpus
}

/// Extract a "kB" value from a meminfo file, in bytes.
///
/// Handles both `/proc/meminfo` ("MemFree: 123 kB") and the per-node form
/// ("Node 0 MemFree: 123 kB").
fn parse_meminfo(s: &str, key: &str) -> u64 {
    for line in s.lines() {
        let mut parts = line.split_whitespace().skip_while(|part| *part != key).skip(1);
        if let Some(Ok(value)) = parts.next().map(str::parse::<u64>) {
            return match parts.next() {
                Some("kB") => value * 1024,
                _ => value,
            };
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_cpulist() {
        assert_eq!(parse_cpulist("0"), vec![0]);
        assert_eq!(parse_cpulist("0-3"), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpulist("0,2,4"), vec![0, 2, 4]);
        assert_eq!(parse_cpulist("0-1,8-9"), vec![0, 1, 8, 9]);
        assert!(parse_cpulist("").is_empty());
    }

    #[test]
    fn test_processor_map_groups_per_node() {
        // interleaved SMT siblings: each node fits one group
        let map = ProcessorMap::build(vec![
            (0, parse_cpulist("0-23,48-71")),
            (1, parse_cpulist("24-47,72-95")),
        ]);
        assert_eq!(map.primary_affinity(0), GroupAffinity::new(0, (1 << 48) - 1));
        assert_eq!(map.primary_affinity(1), GroupAffinity::new(1, (1 << 48) - 1));
        assert_eq!(map.location(72), ProcessorLocation::new(1, 24));
        assert_eq!(map.node_of(map.location(72)), Some(1));
        assert!(map.primary_affinity(2).is_empty());
    }

    #[test]
    fn test_processor_map_wide_node() {
        let map = ProcessorMap::build(vec![
            (0, parse_cpulist("0-47,96-143")),
            (1, parse_cpulist("48-95,144-191")),
        ]);

        // 96 CPUs per node take two groups each
        assert_eq!(map.groups.len(), 4);
        let primary = map.primary_affinity(1);
        assert_eq!(primary, GroupAffinity::new(2, u64::MAX));

        let mut expected: Vec<usize> = (48..96).chain(144..192).collect();
        expected.sort_unstable();
        assert_eq!(map.cpus(&primary), expected);

        // a CPU in the node's second group still resolves to the node
        let location = map.location(170);
        assert_eq!(location, ProcessorLocation::new(3, 10));
        assert_eq!(map.node_of(location), Some(1));

        // a partial mask only selects its own processors
        assert_eq!(map.cpus(&GroupAffinity::new(2, 0b101)), vec![48, 50]);
        assert!(map.cpus(&GroupAffinity::new(9, 1)).is_empty());
    }

    #[test]
    fn test_unmapped_cpu_location() {
        let map = ProcessorMap::build(vec![(0, vec![0, 1])]);
        assert_eq!(map.location(65), ProcessorLocation::new(2, 1));
        assert_eq!(map.node_of(map.location(65)), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let node = "Node 1 MemTotal:       16384 kB\nNode 1 MemFree:         2048 kB\n";
        assert_eq!(parse_meminfo(node, "MemFree:"), 2048 * 1024);
        let proc = "MemTotal:       32768 kB\nMemAvailable:    4096 kB\n";
        assert_eq!(parse_meminfo(proc, "MemAvailable:"), 4096 * 1024);
        assert_eq!(parse_meminfo(proc, "Missing:"), 0);
    }

    #[test]
    fn test_sysfs_topology() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "node/possible", "0-2\n");
        write(dir.path(), "node/node0/cpulist", "0-3\n");
        write(dir.path(), "node/node0/meminfo", "Node 0 MemFree: 10 kB\n");
        // node1 possible but offline: no directory
        write(dir.path(), "node/node2/cpulist", "\n");

        let platform = LinuxPlatform::with_sysfs_root(dir.path());
        assert_eq!(platform.highest_node_number().unwrap(), 2);
        assert_eq!(platform.node_affinity(0).unwrap(), GroupAffinity::new(0, 0xf));
        assert!(platform.node_affinity(1).unwrap().is_empty());
        assert!(platform.node_affinity(2).unwrap().is_empty());
        assert_eq!(platform.available_memory(0).unwrap(), 10 * 1024);
        assert!(platform.available_memory(1).unwrap_err().is_platform_query());
    }

    #[test]
    fn test_without_node_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cpu/online", "0-5\n");

        let platform = LinuxPlatform::with_sysfs_root(dir.path());
        assert_eq!(platform.highest_node_number().unwrap(), 0);
        assert_eq!(platform.node_affinity(0).unwrap(), GroupAffinity::new(0, 0x3f));
        assert!(platform.node_affinity(1).unwrap().is_empty());
    }

    #[test]
    fn test_sysfs_wide_nodes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "node/possible", "0-1\n");
        write(dir.path(), "node/node0/cpulist", "0-47,96-143\n");
        write(dir.path(), "node/node1/cpulist", "48-95,144-191\n");

        let platform = LinuxPlatform::with_sysfs_root(dir.path());
        let catalog = crate::TopologyCatalog::discover(&platform).unwrap();
        assert_eq!(catalog.node_count(), 2);

        let node1 = catalog.node(1).unwrap();
        assert_eq!(node1.affinity, GroupAffinity::new(2, u64::MAX));

        let map = platform.processor_map().unwrap();
        assert_eq!(map.cpus(&node1.affinity).len(), 96);
        assert_eq!(platform.node_of_processor(ProcessorLocation::new(3, 31)), Some(1));
        assert_eq!(platform.node_of_processor(ProcessorLocation::new(3, 32)), None);
    }

    #[test]
    fn test_query_touched_memory() {
        let platform = LinuxPlatform::new();
        let data = vec![1u8; 8 * platform.page_size()];
        let span = crate::audit::PageSpan::new(data.as_ptr() as usize, data.len(), platform.page_size()).unwrap();
        let mut buffer = WorkingSetBuffer::for_span(&span);

        // seccomp profiles in containers may deny move_pages
        if let Err(err) = platform.query_working_set(&mut buffer) {
            assert!(err.is_platform_query());
            return;
        }

        // every page of a written buffer is resident
        assert!(buffer.entries().iter().all(|e| e.attributes.valid()));
    }
}
