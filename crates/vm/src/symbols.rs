use tracing::warn;
use types::{Limits, Process};

/// Offset of an already-declared variable.
pub fn lookup(process: &Process, name: &str) -> Option<u16> {
    process.variable_offsets.get(name).copied()
}

/// Offset of a variable, allocating it on first use. Returns `None` when the
/// symbol table is full, in which case the calling instruction becomes a
/// logged no-op rather than a crash.
pub fn lookup_or_declare(process: &mut Process, name: &str) -> Option<u16> {
    if let Some(offset) = process.variable_offsets.get(name) {
        return Some(*offset);
    }
    if process.next_free_offset + Limits::VAR_SIZE > Limits::SYMBOL_TABLE_SIZE {
        warn!(
            pid = process.id,
            name, "symbol table full; declaration ignored"
        );
        return None;
    }
    let offset = process.next_free_offset;
    process.next_free_offset += Limits::VAR_SIZE;
    process.variable_offsets.insert(name.to_string(), offset);
    Some(offset)
}
