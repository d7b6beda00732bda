use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use crate::instruction::Instruction;

pub type Pid = u32;

/// Lifecycle of a process. FINISHED and CRASHED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Waiting,
    Finished,
    Crashed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Crashed)
    }
}

/// An active FOR: the body being repeated, how many repeats remain, and the
/// cursor into the body for the current repeat.
#[derive(Debug, Clone)]
pub struct ForContext {
    pub body: Vec<Instruction>,
    pub repeat_count: u32,
    pub current_repeat: u32,
    pub current_sub_index: usize,
}

impl ForContext {
    pub fn new(body: Vec<Instruction>, repeat_count: u32) -> Self {
        Self {
            body,
            repeat_count,
            current_repeat: 0,
            current_sub_index: 0,
        }
    }
}

/// A stack of FOR contexts. Pushed on entering a FOR, popped once its
/// repeats are exhausted; nesting a FOR inside a FOR pushes another context.
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    stack: Vec<ForContext>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push(&mut self, ctx: ForContext) {
        self.stack.push(ctx);
    }

    pub fn pop(&mut self) -> Option<ForContext> {
        self.stack.pop()
    }

    /// The innermost active context, if any.
    pub fn current_mut(&mut self) -> Option<&mut ForContext> {
        self.stack.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Everything the emulator tracks about one process: identity, the program
/// and its cursor, the symbol-table layout of its data region, scheduling
/// state, and diagnostics for the report and the screen views.
#[derive(Debug, Clone)]
pub struct Process {
    pub id: Pid,
    pub name: String,
    pub priority: u32,

    pub instructions: Vec<Instruction>,
    pub program_counter: usize,
    pub for_stack: ContextStack,

    /// Size of the virtual address space, bytes. Power of two, 64..65536.
    pub memory_required: usize,
    /// Variable name -> offset within the data region. First write allocates.
    pub variable_offsets: BTreeMap<String, u16>,
    pub next_free_offset: u16,
    pub faulting_address: Option<u16>,

    pub state: ProcessState,
    pub assigned_core: Option<u32>,
    pub last_core: Option<u32>,
    pub sleep_until_tick: u64,

    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    pub logs: Vec<String>,
}

impl Process {
    pub fn new(id: Pid, name: impl Into<String>, memory_required: usize, instructions: Vec<Instruction>) -> Self {
        Self {
            id,
            name: name.into(),
            priority: 0,
            instructions,
            program_counter: 0,
            for_stack: ContextStack::new(),
            memory_required,
            variable_offsets: BTreeMap::new(),
            next_free_offset: 0,
            faulting_address: None,
            state: ProcessState::Ready,
            assigned_core: None,
            last_core: None,
            sleep_until_tick: 0,
            start_time: None,
            end_time: None,
            logs: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Top-level instructions not yet retired. SRTF keys on this.
    pub fn remaining(&self) -> usize {
        self.instructions.len().saturating_sub(self.program_counter)
    }

    /// True once the program counter has run off the end and no FOR is open.
    pub fn at_end(&self) -> bool {
        self.program_counter >= self.instructions.len() && self.for_stack.is_empty()
    }

    pub fn into_handle(self) -> ProcessHandle {
        Arc::new(Mutex::new(self))
    }
}

/// Shared, lock-guarded process record. The registry owns one handle per
/// process; the ready queue and workers hold clones for the duration of a
/// turn only.
pub type ProcessHandle = Arc<Mutex<Process>>;
