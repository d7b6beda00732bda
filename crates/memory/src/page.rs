use types::Pid;

/// One page-table entry, indexed by virtual page number.
///
/// `frame_index` is meaningful only while `valid` is set, and then the
/// manager's reverse map records this (pid, page) as the frame's occupant.
/// `on_backing_store` stays set once the page has been written out, so a
/// later fault-in knows to read the page back instead of zero-filling.
#[derive(Debug, Clone, Default)]
pub struct PageEntry {
    pub valid: bool,
    pub dirty: bool,
    pub on_backing_store: bool,
    pub frame_index: usize,
    pub last_accessed: u64,
}

/// Per-process page table. No frames are referenced at admission; entries
/// become valid lazily through faults.
#[derive(Debug)]
pub struct PageTable {
    pub pid: Pid,
    pub name: String,
    pub memory_required: usize,
    pub entries: Vec<PageEntry>,
}

impl PageTable {
    pub fn new(pid: Pid, name: String, memory_required: usize, frame_size: usize) -> Self {
        let pages = memory_required.div_ceil(frame_size);
        Self {
            pid,
            name,
            memory_required,
            entries: vec![PageEntry::default(); pages],
        }
    }

    pub fn resident_pages(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }
}

/// Where a virtual page currently lives, for reports and screen views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLocation {
    Resident(usize),
    OnDisk,
    Unallocated,
}

/// Read-only view of one page-table row.
#[derive(Debug, Clone, Copy)]
pub struct PageView {
    pub page: usize,
    pub location: PageLocation,
    pub dirty: bool,
}

impl PageView {
    pub fn from_entry(page: usize, entry: &PageEntry) -> Self {
        let location = if entry.valid {
            PageLocation::Resident(entry.frame_index)
        } else if entry.on_backing_store {
            PageLocation::OnDisk
        } else {
            PageLocation::Unallocated
        };
        Self {
            page,
            location,
            dirty: entry.dirty,
        }
    }

    /// Compact rendering used by `process-smi`.
    pub fn label(&self, pid: Pid) -> String {
        match self.location {
            PageLocation::Resident(frame) => format!("[P{pid} Pg#{} -> MEM:{frame}]", self.page),
            PageLocation::OnDisk => format!("[P{pid} Pg#{} -> DISK]", self.page),
            PageLocation::Unallocated => format!("[P{pid} Pg#{} -> --]", self.page),
        }
    }
}
