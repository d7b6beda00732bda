use std::fmt;

/// Failures of the memory manager's public operations. A page fault is not
/// among them: fault-in is serviced transparently and surfaced to callers as
/// a boolean so the worker can charge the turn, never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// The pid has no page table.
    NoSuchProcess,
    /// Admission with a pid that is already registered.
    AlreadyExists,
    /// Admission would leave some resident process without a frame.
    AdmissionDenied,
    /// `addr + 2` runs past the process's address space.
    OutOfBounds(u16),
    /// A 2-byte access may not cross a page boundary.
    StraddlesPage(u16),
}

impl MemError {
    /// The address a crashed process reports, when the failure has one.
    pub fn faulting_address(self) -> Option<u16> {
        match self {
            Self::OutOfBounds(addr) | Self::StraddlesPage(addr) => Some(addr),
            _ => None,
        }
    }
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchProcess => write!(f, "no such process"),
            Self::AlreadyExists => write!(f, "pid already registered"),
            Self::AdmissionDenied => write!(f, "admission denied: memory full"),
            Self::OutOfBounds(addr) => write!(f, "access at {addr:#06x} out of bounds"),
            Self::StraddlesPage(addr) => write!(f, "access at {addr:#06x} straddles a page boundary"),
        }
    }
}

impl std::error::Error for MemError {}
