use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use types::Pid;

/// Flat binary file holding paged-out process memory.
///
/// The file is random-access and keyed by (pid, page#): the slot for a page
/// lives at `(pid * max_pages_per_process + page) * frame_size`. Every dirty
/// eviction writes exactly one frame-sized slot and every fault-in of a page
/// that has been out before reads exactly that slot back. The file is
/// truncated on open, so nothing survives a restart.
#[derive(Debug)]
pub struct BackingStore {
    file: File,
    frame_size: usize,
    max_pages_per_process: usize,
}

impl BackingStore {
    pub fn open(path: impl AsRef<Path>, frame_size: usize, max_pages_per_process: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            frame_size,
            max_pages_per_process,
        })
    }

    fn slot(&self, pid: Pid, page: usize) -> u64 {
        (pid as u64 * self.max_pages_per_process as u64 + page as u64) * self.frame_size as u64
    }

    /// Persist one evicted frame. `bytes` must be exactly one frame.
    pub fn write_page(&mut self, pid: Pid, page: usize, bytes: &[u8]) -> io::Result<()> {
        debug_assert_eq!(bytes.len(), self.frame_size);
        self.file.seek(SeekFrom::Start(self.slot(pid, page)))?;
        self.file.write_all(bytes)
    }

    /// Recall a previously written page into `buf`.
    pub fn read_page(&mut self, pid: Pid, page: usize, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), self.frame_size);
        self.file.seek(SeekFrom::Start(self.slot(pid, page)))?;
        self.file.read_exact(buf)
    }
}
