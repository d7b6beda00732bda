/// Fixed limits of the emulated machine. These are architectural constants,
/// not tunables; everything an operator can change lives in the kernel's
/// `Config`.
pub struct Limits;

impl Limits {
    /// Bytes reserved for process variables. 32 variables of 2 bytes each.
    pub const SYMBOL_TABLE_SIZE: u16 = 64;
    /// Every variable is an unsigned 16-bit value.
    pub const VAR_SIZE: u16 = 2;

    /// Smallest and largest per-process address space, in bytes.
    pub const MIN_PROC_MEMORY: usize = 64;
    pub const MAX_PROC_MEMORY: usize = 65536;

    /// Wall-time length of one clock tick.
    pub const TICK_INTERVAL_MS: u64 = 10;
    /// Ticks between memory snapshots.
    pub const SNAPSHOT_INTERVAL_TICKS: u64 = 100;

    /// Upper bound of a SLEEP argument, in ticks.
    pub const SLEEP_MAX_TICKS: u64 = 255;

    /// Instruction count bounds for an inline (`screen -c`) program.
    pub const MAX_INLINE_INSTRUCTIONS: usize = 50;

    /// Defaults for the tunables the config file may override.
    pub const DEFAULT_AVG_INSTRUCTION_SIZE: u16 = 8;
    pub const DEFAULT_MAX_FOR_DEPTH: usize = 3;
}
