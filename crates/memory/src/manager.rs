use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Local;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use types::{Clock, Limits, MemError, Pid};

use crate::backing::BackingStore;
use crate::page::{PageEntry, PageTable, PageView};

/// File name of the backing store. Binary content despite the extension.
pub const DEFAULT_BACKING_FILE: &str = "csopesy-backing-store.txt";

/// Counters and totals for the `vmstat` view.
#[derive(Debug, Clone, Copy)]
pub struct MemStats {
    pub total_memory: usize,
    pub frame_size: usize,
    pub total_frames: usize,
    pub used_frames: usize,
    pub page_faults: u64,
    pub dirty_evictions: u64,
}

impl MemStats {
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.used_frames
    }

    pub fn used_bytes(&self) -> usize {
        self.used_frames * self.frame_size
    }

    pub fn free_bytes(&self) -> usize {
        self.free_frames() * self.frame_size
    }
}

/// Everything the manager mutates, behind one coarse mutex.
#[derive(Debug)]
struct ManagerState {
    /// Physical memory, one boxed frame per index.
    frames: Vec<Vec<u8>>,
    occupied: Vec<bool>,
    /// Occupied frame indices in fault-in order; the FIFO replacement queue.
    fifo: VecDeque<usize>,
    /// Reverse map: frame -> (pid, page#) of its occupant.
    frame_to_page: Vec<Option<(Pid, usize)>>,
    tables: HashMap<Pid, PageTable>,
    backing: BackingStore,
    page_faults: u64,
    dirty_evictions: u64,
}

/// The paged virtual-memory subsystem.
///
/// EDUCATIONAL PURPOSE: this is the piece that turns a flat byte array into
/// "virtual memory". Each process sees a private address space sized at
/// admission; the manager maps the pages of that space onto a much smaller
/// pool of physical frames, spilling to a disk file when the pool runs out.
/// Every data access and every instruction fetch in the emulator flows
/// through here.
///
/// DESIGN:
/// - Admission only builds a page table. No frame is touched until the first
///   access faults the page in, which is how real demand paging behaves.
/// - Replacement is FIFO over the frame pool. Deterministic and easy to
///   reason about; its known pathologies are acceptable here.
/// - One coarse mutex serializes the whole manager. Operations are a few
///   memcpy-scale steps, so contention is cheaper than fine-grained locking
///   would be to get right.
///
/// Callers never hold the scheduler's queue lock while calling in; lock
/// order is queue, then process, then this manager.
#[derive(Debug)]
pub struct MemoryManager {
    total_memory: usize,
    frame_size: usize,
    total_frames: usize,
    /// Partition width of the backing store; bounds any single process.
    max_pages_per_process: usize,
    clock: Arc<Clock>,
    state: Mutex<ManagerState>,
    /// Signature of the last emitted snapshot, for duplicate suppression.
    last_signature: Mutex<Option<[u8; 32]>>,
}

impl MemoryManager {
    /// Build the frame pool and open (truncating) the backing store.
    /// `total_memory` and `frame_size` are validated powers of two upstream.
    pub fn new(
        total_memory: usize,
        frame_size: usize,
        backing_path: impl AsRef<Path>,
        clock: Arc<Clock>,
    ) -> io::Result<Self> {
        let total_frames = total_memory / frame_size;
        let max_pages_per_process = Limits::MAX_PROC_MEMORY / frame_size;
        let backing = BackingStore::open(backing_path, frame_size, max_pages_per_process)?;
        info!(total_frames, frame_size, "memory manager initialized");
        Ok(Self {
            total_memory,
            frame_size,
            total_frames,
            max_pages_per_process,
            clock,
            state: Mutex::new(ManagerState {
                frames: vec![vec![0u8; frame_size]; total_frames],
                occupied: vec![false; total_frames],
                fifo: VecDeque::new(),
                frame_to_page: vec![None; total_frames],
                tables: HashMap::new(),
                backing,
                page_faults: 0,
                dirty_evictions: 0,
            }),
            last_signature: Mutex::new(None),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Register a process's page table. Purely bookkeeping: no frame is
    /// reserved and no I/O happens here; all allocation is lazy via faults.
    ///
    /// Admission is denied once every frame is spoken for by an admitted
    /// process, so each resident process can keep at least one page in
    /// memory; the generator parks denied processes and retries.
    pub fn create_process(&self, pid: Pid, name: &str, memory_required: usize) -> Result<(), MemError> {
        let mut state = self.lock_state();
        if state.tables.contains_key(&pid) {
            return Err(MemError::AlreadyExists);
        }
        if state.tables.len() >= self.total_frames {
            debug!(pid, name, "admission denied: frame pool fully subscribed");
            return Err(MemError::AdmissionDenied);
        }
        let table = PageTable::new(pid, name.to_string(), memory_required, self.frame_size);
        info!(pid, name, pages = table.entries.len(), "admitted process");
        state.tables.insert(pid, table);
        Ok(())
    }

    /// Release a process: free its resident frames and drop its page table.
    /// Backing-store slots are simply abandoned; the partition scheme keeps
    /// them from ever colliding with another pid.
    pub fn remove_process(&self, pid: Pid) {
        let mut state = self.lock_state();
        let Some(table) = state.tables.remove(&pid) else {
            return;
        };
        for entry in table.entries.iter().filter(|e| e.valid) {
            let frame = entry.frame_index;
            state.occupied[frame] = false;
            state.frame_to_page[frame] = None;
        }
        let ManagerState { fifo, occupied, .. } = &mut *state;
        fifo.retain(|&f| occupied[f]);
        debug!(pid, "released process memory");
    }

    pub fn admitted_count(&self) -> usize {
        self.lock_state().tables.len()
    }

    /// Read a 2-byte value. The boolean reports whether a page fault was
    /// serviced on the way; the worker charges that as a turn of latency.
    pub fn read(&self, pid: Pid, addr: u16) -> Result<(u16, bool), MemError> {
        let mut state = self.lock_state();
        let (page, offset) = self.locate(&state, pid, addr)?;
        let faulted = self.ensure_resident(&mut state, pid, page)?;
        let table = state.tables.get_mut(&pid).ok_or(MemError::NoSuchProcess)?;
        let entry = &mut table.entries[page];
        entry.last_accessed = self.clock.now();
        let frame = entry.frame_index;
        let bytes = [state.frames[frame][offset], state.frames[frame][offset + 1]];
        Ok((u16::from_le_bytes(bytes), faulted))
    }

    /// Write a 2-byte value, marking the page dirty.
    pub fn write(&self, pid: Pid, addr: u16, value: u16) -> Result<bool, MemError> {
        let mut state = self.lock_state();
        let (page, offset) = self.locate(&state, pid, addr)?;
        let faulted = self.ensure_resident(&mut state, pid, page)?;
        let now = self.clock.now();
        let table = state.tables.get_mut(&pid).ok_or(MemError::NoSuchProcess)?;
        let entry = &mut table.entries[page];
        entry.dirty = true;
        entry.last_accessed = now;
        let frame = entry.frame_index;
        state.frames[frame][offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        Ok(faulted)
    }

    /// Reserve the page containing `addr` without moving any bytes. The
    /// worker calls this before each instruction fetch so that fetches fault
    /// just like data accesses do.
    pub fn touch_page(&self, pid: Pid, addr: u16) -> Result<bool, MemError> {
        let mut state = self.lock_state();
        let table = state.tables.get(&pid).ok_or(MemError::NoSuchProcess)?;
        if addr as usize >= table.memory_required {
            return Err(MemError::OutOfBounds(addr));
        }
        let page = addr as usize / self.frame_size;
        let faulted = self.ensure_resident(&mut state, pid, page)?;
        let now = self.clock.now();
        if let Some(table) = state.tables.get_mut(&pid) {
            table.entries[page].last_accessed = now;
        }
        Ok(faulted)
    }

    /// Validate an access and split it into (page, in-frame offset).
    fn locate(&self, state: &ManagerState, pid: Pid, addr: u16) -> Result<(usize, usize), MemError> {
        let table = state.tables.get(&pid).ok_or(MemError::NoSuchProcess)?;
        let addr = addr as usize;
        if addr + Limits::VAR_SIZE as usize > table.memory_required {
            return Err(MemError::OutOfBounds(addr as u16));
        }
        if addr % self.frame_size + Limits::VAR_SIZE as usize > self.frame_size {
            return Err(MemError::StraddlesPage(addr as u16));
        }
        Ok((addr / self.frame_size, addr % self.frame_size))
    }

    /// Fault the page in if it is not resident. Returns whether a fault was
    /// serviced.
    ///
    /// EDUCATIONAL: this is the demand-paging core. A miss picks a frame
    /// (evicting the FIFO victim when none is free), fills it either from
    /// the backing store or with zeroes, and rewires the page table and the
    /// reverse map. The caller still holds the manager lock, so the whole
    /// fault is atomic with respect to every other memory operation.
    fn ensure_resident(&self, state: &mut ManagerState, pid: Pid, page: usize) -> Result<bool, MemError> {
        let already = state
            .tables
            .get(&pid)
            .ok_or(MemError::NoSuchProcess)?
            .entries
            .get(page)
            .map(|e| e.valid)
            .ok_or(MemError::OutOfBounds((page * self.frame_size) as u16))?;
        if already {
            return Ok(false);
        }

        let frame = match self.free_frame_or_evict(state) {
            Some(frame) => frame,
            None => {
                // Unreachable while any process is resident; see the
                // admission rule.
                error!(pid, page, "no free frame and no evictable victim");
                return Err(MemError::AdmissionDenied);
            }
        };

        let on_store = state.tables[&pid].entries[page].on_backing_store;
        if on_store {
            let mut buf = vec![0u8; self.frame_size];
            if let Err(err) = state.backing.read_page(pid, page, &mut buf) {
                error!(pid, page, %err, "backing-store read failed; zero-filling");
                buf.fill(0);
            }
            state.frames[frame].copy_from_slice(&buf);
        } else {
            state.frames[frame].fill(0);
        }

        state.occupied[frame] = true;
        state.frame_to_page[frame] = Some((pid, page));
        state.fifo.push_back(frame);
        state.page_faults += 1;

        let tick = self.clock.now();
        let table = state.tables.get_mut(&pid).ok_or(MemError::NoSuchProcess)?;
        let entry = &mut table.entries[page];
        *entry = PageEntry {
            valid: true,
            dirty: false,
            on_backing_store: on_store,
            frame_index: frame,
            last_accessed: tick,
        };
        debug!(pid, page, frame, "page fault serviced");
        Ok(true)
    }

    /// Pick a frame for a fault-in: the first free one, or the FIFO victim
    /// after paging it out.
    fn free_frame_or_evict(&self, state: &mut ManagerState) -> Option<usize> {
        if let Some(frame) = state.occupied.iter().position(|&used| !used) {
            return Some(frame);
        }
        let victim = state.fifo.pop_front()?;
        self.page_out(state, victim);
        Some(victim)
    }

    /// Evict the occupant of `victim`, writing it to the backing store first
    /// when dirty.
    fn page_out(&self, state: &mut ManagerState, victim: usize) {
        let Some((pid, page)) = state.frame_to_page[victim] else {
            state.occupied[victim] = false;
            return;
        };
        let dirty = state
            .tables
            .get(&pid)
            .map(|t| t.entries[page].dirty)
            .unwrap_or(false);
        if dirty {
            let bytes = std::mem::take(&mut state.frames[victim]);
            if let Err(err) = state.backing.write_page(pid, page, &bytes) {
                error!(pid, page, %err, "backing-store write failed; page contents lost");
            }
            state.frames[victim] = bytes;
            state.dirty_evictions += 1;
        }
        if let Some(table) = state.tables.get_mut(&pid) {
            let entry = &mut table.entries[page];
            entry.valid = false;
            entry.dirty = false;
            if dirty {
                entry.on_backing_store = true;
            }
        }
        state.frame_to_page[victim] = None;
        state.occupied[victim] = false;
        debug!(pid, page, frame = victim, dirty, "evicted page");
    }

    pub fn stats(&self) -> MemStats {
        let state = self.lock_state();
        MemStats {
            total_memory: self.total_memory,
            frame_size: self.frame_size,
            total_frames: self.total_frames,
            used_frames: state.occupied.iter().filter(|&&o| o).count(),
            page_faults: state.page_faults,
            dirty_evictions: state.dirty_evictions,
        }
    }

    /// Page-table rows for one process, for `process-smi` and screen views.
    pub fn process_pages(&self, pid: Pid) -> Result<Vec<PageView>, MemError> {
        let state = self.lock_state();
        let table = state.tables.get(&pid).ok_or(MemError::NoSuchProcess)?;
        Ok(table
            .entries
            .iter()
            .enumerate()
            .map(|(page, entry)| PageView::from_entry(page, entry))
            .collect())
    }

    /// Point-in-time snapshot of the whole subsystem as a text artifact.
    /// Returns `None` when the state (ignoring the tick header) is identical
    /// to the previous snapshot, so quiet periods do not spam the disk.
    ///
    /// The string is built fully under the manager lock and handed to the
    /// asynchronous writer by the caller after the lock is gone.
    pub fn snapshot(&self, tick: u64) -> Option<String> {
        let body = {
            let state = self.lock_state();
            self.render_snapshot_body(&state)
        };

        let digest: [u8; 32] = Sha256::digest(body.as_bytes()).into();
        let mut last = match self.last_signature.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last == Some(digest) {
            debug!(tick, "snapshot unchanged; suppressed");
            return None;
        }
        *last = Some(digest);

        let header = format!(
            "Memory snapshot @ tick {tick} {}\n",
            Local::now().format("(%m/%d/%Y %I:%M:%S%p)")
        );
        Some(header + &body)
    }

    fn render_snapshot_body(&self, state: &ManagerState) -> String {
        use std::fmt::Write as _;

        let used = state.occupied.iter().filter(|&&o| o).count();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Frames: {used} used / {} free ({} total, {} bytes each)",
            self.total_frames - used,
            self.total_frames,
            self.frame_size
        );
        let _ = writeln!(out, "Page faults: {}", state.page_faults);
        let _ = writeln!(out, "Dirty evictions: {}", state.dirty_evictions);
        out.push('\n');

        for (frame, occupant) in state.frame_to_page.iter().enumerate() {
            match occupant {
                Some((pid, page)) => {
                    let _ = writeln!(out, "Frame {frame:03}: P{pid} pg#{page}");
                }
                None => {
                    let _ = writeln!(out, "Frame {frame:03}: free");
                }
            }
        }
        out.push('\n');

        let mut pids: Vec<Pid> = state.tables.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            let table = &state.tables[&pid];
            let _ = writeln!(
                out,
                "Process {pid} ({}), {} bytes, {} pages:",
                table.name,
                table.memory_required,
                table.entries.len()
            );
            for (page, entry) in table.entries.iter().enumerate() {
                let view = PageView::from_entry(page, entry);
                let location = match view.location {
                    crate::page::PageLocation::Resident(frame) => format!("frame {frame}"),
                    crate::page::PageLocation::OnDisk => "on disk".to_string(),
                    crate::page::PageLocation::Unallocated => "unallocated".to_string(),
                };
                let dirty = if view.dirty { " [dirty]" } else { "" };
                let _ = writeln!(out, "  pg#{page} -> {location}{dirty}");
            }
        }
        out
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
