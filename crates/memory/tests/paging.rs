use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use memory::{BackingStore, MemoryManager, PageLocation};
use types::{Clock, MemError};

fn temp_backing(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("emu-backing-{tag}-{}.bin", std::process::id()))
}

fn manager(tag: &str, total: usize, frame: usize) -> Arc<MemoryManager> {
    let clock = Arc::new(Clock::new());
    Arc::new(MemoryManager::new(total, frame, temp_backing(tag), clock).unwrap())
}

#[test]
fn admission_reserves_no_frames() {
    let mem = manager("admit", 256, 64);
    mem.create_process(1, "p1", 128).unwrap();
    let stats = mem.stats();
    assert_eq!(stats.used_frames, 0);
    assert_eq!(stats.page_faults, 0);
    let pages = mem.process_pages(1).unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages.iter().all(|v| v.location == PageLocation::Unallocated));
}

#[test]
fn pid_collision_is_rejected() {
    let mem = manager("collide", 256, 64);
    mem.create_process(1, "p1", 128).unwrap();
    assert_eq!(mem.create_process(1, "p1b", 64), Err(MemError::AlreadyExists));
}

#[test]
fn admission_denied_when_frames_are_fully_subscribed() {
    // Two frames: the third admission must park until someone leaves.
    let mem = manager("denied", 128, 64);
    mem.create_process(1, "p1", 128).unwrap();
    mem.create_process(2, "p2", 128).unwrap();
    assert_eq!(mem.create_process(3, "p3", 128), Err(MemError::AdmissionDenied));

    mem.remove_process(1);
    mem.create_process(3, "p3", 128).unwrap();
    assert_eq!(mem.admitted_count(), 2);
}

#[test]
fn bounds_and_straddle_checks() {
    let mem = manager("bounds", 256, 64);
    mem.create_process(1, "p1", 128).unwrap();

    assert_eq!(mem.read(9, 0), Err(MemError::NoSuchProcess));
    assert_eq!(mem.write(1, 127, 1), Err(MemError::OutOfBounds(127)));
    assert_eq!(mem.write(1, 200, 1), Err(MemError::OutOfBounds(200)));
    // Last byte of page 0: a 2-byte access would cross into page 1.
    assert_eq!(mem.write(1, 63, 1), Err(MemError::StraddlesPage(63)));
    // In-bounds, page-aligned accesses are fine.
    mem.write(1, 126, 7).unwrap();
    assert_eq!(mem.read(1, 126).unwrap().0, 7);
}

#[test]
fn first_touch_faults_then_hits() {
    let mem = manager("touch", 256, 64);
    mem.create_process(1, "p1", 128).unwrap();

    assert!(mem.touch_page(1, 0).unwrap());
    assert!(!mem.touch_page(1, 0).unwrap());
    assert!(!mem.write(1, 2, 42).unwrap());
    assert_eq!(mem.read(1, 2).unwrap(), (42, false));
    assert_eq!(mem.touch_page(1, 200), Err(MemError::OutOfBounds(200)));
    assert_eq!(mem.stats().page_faults, 1);
}

/// Four 2-page processes on four frames. Writing both pages
/// of each forces dirty evictions; earlier values must survive the trip
/// through the backing store.
#[test]
fn page_fault_across_eviction_round_trips() {
    let mem = manager("evict", 256, 64);
    for pid in 1..=4 {
        mem.create_process(pid, &format!("p{pid}"), 128).unwrap();
    }
    for pid in 1..=4u32 {
        mem.write(pid, 0, 100 + pid as u16).unwrap();
    }
    for pid in 1..=4u32 {
        mem.write(pid, 64, 200 + pid as u16).unwrap();
    }

    let stats = mem.stats();
    assert!(stats.page_faults >= 8, "page faults: {}", stats.page_faults);
    assert!(
        stats.dirty_evictions >= 4,
        "dirty evictions: {}",
        stats.dirty_evictions
    );

    for pid in 1..=4u32 {
        let (value, _) = mem.read(pid, 0).unwrap();
        assert_eq!(value, 100 + pid as u16, "pid {pid} lost its page-0 write");
        let (value, _) = mem.read(pid, 64).unwrap();
        assert_eq!(value, 200 + pid as u16, "pid {pid} lost its page-1 write");
    }
}

/// Frame consistency, observed through the public views: every resident
/// page maps to a distinct frame and the used-frame count agrees.
#[test]
fn resident_pages_map_to_distinct_frames() {
    let mem = manager("frames", 256, 64);
    for pid in 1..=3 {
        mem.create_process(pid, &format!("p{pid}"), 128).unwrap();
        mem.write(pid, 0, pid as u16).unwrap();
    }
    mem.write(1, 64, 9).unwrap();

    let mut frames = HashSet::new();
    let mut resident = 0;
    for pid in 1..=3 {
        for view in mem.process_pages(pid).unwrap() {
            if let PageLocation::Resident(frame) = view.location {
                resident += 1;
                assert!(frames.insert(frame), "frame {frame} double-booked");
            }
        }
    }
    assert_eq!(resident, mem.stats().used_frames);
}

#[test]
fn removal_frees_frames_for_future_faults() {
    let mem = manager("remove", 128, 64);
    mem.create_process(1, "p1", 128).unwrap();
    mem.write(1, 0, 1).unwrap();
    mem.write(1, 64, 2).unwrap();
    assert_eq!(mem.stats().used_frames, 2);

    mem.remove_process(1);
    assert_eq!(mem.stats().used_frames, 0);
    assert_eq!(mem.admitted_count(), 0);

    mem.create_process(2, "p2", 128).unwrap();
    mem.write(2, 0, 5).unwrap();
    assert_eq!(mem.read(2, 0).unwrap().0, 5);
}

#[test]
fn snapshots_suppress_identical_content() {
    let mem = manager("snap", 256, 64);
    mem.create_process(1, "p1", 128).unwrap();
    mem.write(1, 0, 11).unwrap();

    let first = mem.snapshot(100).expect("first snapshot emitted");
    assert!(first.contains("tick 100"));
    assert!(first.contains("Page faults: 1"));

    // Nothing changed: the next snapshot is coalesced away.
    assert_eq!(mem.snapshot(200), None);

    mem.write(1, 64, 12).unwrap();
    let third = mem.snapshot(300).expect("changed state snapshots again");
    assert!(third.contains("tick 300"));
}

#[test]
fn backing_store_slots_are_partitioned_by_pid_and_page() {
    let frame_size = 64;
    let max_pages = 65536 / frame_size;
    let path = temp_backing("layout");
    let mut store = BackingStore::open(&path, frame_size, max_pages).unwrap();

    let page_a: Vec<u8> = (0..frame_size as u16).map(|i| (i % 251) as u8).collect();
    let page_b = vec![0xABu8; frame_size];
    store.write_page(2, 3, &page_a).unwrap();
    store.write_page(0, 0, &page_b).unwrap();

    let mut buf = vec![0u8; frame_size];
    store.read_page(2, 3, &mut buf).unwrap();
    assert_eq!(buf, page_a);

    // The slot sits exactly at (pid * max_pages + page) * frame_size.
    let raw = std::fs::read(&path).unwrap();
    let offset = (2 * max_pages + 3) * frame_size;
    assert_eq!(&raw[offset..offset + frame_size], page_a.as_slice());
}
