//! Smoke tests against the native backend. Skipped where NUMA queries are
//! unavailable.

use numabind::platform::{self, Platform};
use numabind::{AffinityDispatcher, MemoryAuditor, ThreadLocator, TopologyCatalog};

#[test]
fn discover_and_locate() {
    if !numabind::has_numa_support() {
        return;
    }
    let platform = platform::native();

    let catalog = TopologyCatalog::discover(&platform).unwrap();
    assert!(!catalog.is_empty());
    assert!(catalog.nodes().windows(2).all(|w| w[0].id < w[1].id));

    let location = ThreadLocator::new(&catalog, &platform).locate().unwrap();
    assert!(location.cpu.is_some());
    assert!(location.group.is_some());
}

#[test]
fn touched_buffer_is_resident() {
    if !numabind::has_numa_support() {
        return;
    }
    let platform = platform::native();
    let catalog = TopologyCatalog::discover(&platform).unwrap();

    let page = platform.page_size();
    let data = vec![1u8; 8 * page];
    let auditor = MemoryAuditor::new(&platform);

    // restricted sandboxes may refuse the page query itself
    if let Ok(report) = auditor.slice_regions(&data) {
        assert!(report.page_count() >= 8);
        for region in report.regions().iter().filter(|r| r.valid) {
            assert!(catalog.index_of(region.node).is_some() || catalog.node_count() == 1);
        }
    }
}

#[test]
fn buffer_written_after_pinning_is_resident() {
    if !numabind::has_numa_support() {
        return;
    }
    let platform = platform::native();
    let catalog = TopologyCatalog::discover(&platform).unwrap();
    let dispatcher = AffinityDispatcher::new(&catalog, &platform).unwrap();

    // cpusets in containers may reject the node's processors
    let node = match dispatcher.pin_current_thread(0) {
        Ok(node) => *node,
        Err(_) => return,
    };
    assert_eq!(ThreadLocator::new(&catalog, &platform).locate().unwrap().node, Some(node.id));

    let data = vec![1u8; 1 << 20];
    if let Ok(report) = MemoryAuditor::new(&platform).slice_regions(&data) {
        assert_eq!(report.resident_pages(), report.page_count());
    }
}
