use std::sync::Arc;

use tracing::warn;

use memory::MemoryManager;
use types::{local_timestamp, Clock, ForContext, Instruction, Limits, Opcode, Process, ProcessState};

use crate::symbols;

/// Outcome of one interpreter step. The worker's turn loop switches on this
/// instead of relying on unwinding; nothing in the interpreter panics on a
/// bad program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The instruction retired (or a loop context was retired).
    Advanced,
    /// The process hit a terminal error; `state` is CRASHED.
    Crashed,
    /// The process parked itself (SLEEP, or still inside a sleep window).
    Waiting,
    /// A data access faulted a page in. The instruction did not retire and
    /// will be re-dispatched on the process's next turn.
    PageFault,
}

/// Executes one instruction per call against a process record, routing every
/// data access through the memory manager.
///
/// The interpreter is purely synchronous and never blocks: it yields by
/// setting the process state and returning, and the worker loop is the only
/// path back in. That keeps every scheduling decision in one place.
#[derive(Debug)]
pub struct Interpreter {
    mem: Arc<MemoryManager>,
    clock: Arc<Clock>,
    max_for_depth: usize,
}

impl Interpreter {
    pub fn new(mem: Arc<MemoryManager>, clock: Arc<Clock>, max_for_depth: usize) -> Self {
        Self {
            mem,
            clock,
            max_for_depth,
        }
    }

    /// Execute one instruction (or retire one loop boundary) of `process`.
    pub fn step(&self, process: &mut Process) -> Step {
        if process.state == ProcessState::Crashed {
            return Step::Crashed;
        }

        // A sleeping process re-checks its wake tick here; until the clock
        // catches up it keeps yielding through the ready queue.
        if process.sleep_until_tick > self.clock.now() {
            process.state = ProcessState::Waiting;
            return Step::Waiting;
        }
        if process.state == ProcessState::Waiting {
            process.state = ProcessState::Running;
        }

        if let Some(ctx) = process.for_stack.current_mut() {
            if ctx.current_repeat >= ctx.repeat_count {
                process.for_stack.pop();
                advance_cursor(process);
                return Step::Advanced;
            }
            if ctx.current_sub_index >= ctx.body.len() {
                ctx.current_sub_index = 0;
                ctx.current_repeat += 1;
                if ctx.current_repeat >= ctx.repeat_count {
                    process.for_stack.pop();
                    advance_cursor(process);
                    return Step::Advanced;
                }
            }
            let instr = ctx.body[ctx.current_sub_index].clone();
            return self.dispatch_and_advance(process, &instr);
        }

        if process.program_counter >= process.instructions.len() {
            return Step::Advanced;
        }
        let instr = process.instructions[process.program_counter].clone();
        self.dispatch_and_advance(process, &instr)
    }

    /// Dispatch one instruction, then move the innermost cursor past it if it
    /// retired. A page fault leaves the cursor alone so the instruction runs
    /// again once the process gets another turn; FOR advances only when its
    /// context pops.
    fn dispatch_and_advance(&self, process: &mut Process, instr: &Instruction) -> Step {
        if instr.opcode == Opcode::For {
            let pushed = self.op_for(process, instr);
            if process.state == ProcessState::Crashed {
                return Step::Crashed;
            }
            if !pushed {
                advance_cursor(process);
            }
            return Step::Advanced;
        }

        let step = self.dispatch(process, instr);
        if matches!(step, Step::Advanced | Step::Waiting) {
            advance_cursor(process);
        }
        step
    }

    fn dispatch(&self, process: &mut Process, instr: &Instruction) -> Step {
        match instr.opcode {
            Opcode::Print => self.op_print(process, instr),
            Opcode::Declare => self.op_declare(process, instr),
            Opcode::Add => self.op_arith(process, instr, ArithKind::Add),
            Opcode::Subtract => self.op_arith(process, instr, ArithKind::Subtract),
            Opcode::Sleep => self.op_sleep(process, instr),
            Opcode::Read => self.op_read(process, instr),
            Opcode::Write => self.op_write(process, instr),
            Opcode::For => unreachable!("FOR is handled by dispatch_and_advance"),
        }
    }

    fn op_print(&self, process: &mut Process, instr: &Instruction) -> Step {
        if instr.args.is_empty() {
            return Step::Advanced;
        }
        let mut text = String::new();
        for arg in &instr.args {
            if let Some(literal) = quoted_literal(arg) {
                text.push_str(literal);
            } else if arg.chars().all(|c| c.is_ascii_digit()) {
                text.push_str(arg);
            } else {
                match self.load_variable(process, arg) {
                    Ok(value) => text.push_str(&value.to_string()),
                    Err(step) => return step,
                }
            }
        }
        let core = process
            .assigned_core
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        process
            .logs
            .push(format!("{} Core:{core} \"{text}\"", local_timestamp()));
        Step::Advanced
    }

    fn op_declare(&self, process: &mut Process, instr: &Instruction) -> Step {
        let [name, literal] = instr.args.as_slice() else {
            return crash(process, None);
        };
        let Some(value) = parse_u16_literal(literal) else {
            return crash(process, None);
        };
        self.store_variable(process, name, value)
    }

    fn op_arith(&self, process: &mut Process, instr: &Instruction, kind: ArithKind) -> Step {
        let [dest, a, b] = instr.args.as_slice() else {
            return crash(process, None);
        };
        let lhs = match self.operand_value(process, a) {
            Ok(v) => v,
            Err(step) => return step,
        };
        let rhs = match self.operand_value(process, b) {
            Ok(v) => v,
            Err(step) => return step,
        };
        let result = match kind {
            ArithKind::Add => lhs.saturating_add(rhs),
            ArithKind::Subtract => lhs.wrapping_sub(rhs),
        };
        self.store_variable(process, dest, result)
    }

    fn op_sleep(&self, process: &mut Process, instr: &Instruction) -> Step {
        let [ticks] = instr.args.as_slice() else {
            return crash(process, None);
        };
        let Some(ticks) = parse_u16_literal(ticks).filter(|&t| u64::from(t) <= Limits::SLEEP_MAX_TICKS) else {
            return crash(process, None);
        };
        process.sleep_until_tick = self.clock.now() + u64::from(ticks);
        process.state = ProcessState::Waiting;
        Step::Waiting
    }

    /// Returns whether a loop context was pushed. A FOR with a non-positive
    /// count, an empty body, or at the nesting cap is a no-op.
    fn op_for(&self, process: &mut Process, instr: &Instruction) -> bool {
        let [count] = instr.args.as_slice() else {
            crash(process, None);
            return false;
        };
        let Ok(count) = count.parse::<i64>() else {
            crash(process, None);
            return false;
        };
        if count <= 0 || instr.sub_instructions.is_empty() {
            return false;
        }
        if process.for_stack.depth() >= self.max_for_depth {
            warn!(pid = process.id, depth = self.max_for_depth, "FOR nesting cap reached; ignored");
            return false;
        }
        process
            .for_stack
            .push(ForContext::new(instr.sub_instructions.clone(), count as u32));
        true
    }

    fn op_read(&self, process: &mut Process, instr: &Instruction) -> Step {
        let [name, addr] = instr.args.as_slice() else {
            return crash(process, None);
        };
        let Some(addr) = parse_hex_address(addr) else {
            return crash(process, None);
        };
        match self.mem.read(process.id, addr) {
            Ok((_, true)) => page_fault(process),
            Ok((value, false)) => self.store_variable(process, name, value),
            Err(_) => crash(process, Some(addr)),
        }
    }

    fn op_write(&self, process: &mut Process, instr: &Instruction) -> Step {
        let [addr, value] = instr.args.as_slice() else {
            return crash(process, None);
        };
        let Some(addr) = parse_hex_address(addr) else {
            return crash(process, None);
        };
        let value = match self.operand_value(process, value) {
            Ok(v) => v,
            Err(step) => return step,
        };
        match self.mem.write(process.id, addr, value) {
            Ok(true) => page_fault(process),
            Ok(false) => Step::Advanced,
            Err(_) => crash(process, Some(addr)),
        }
    }

    /// Resolve an operand token: a decimal literal, or the current value of a
    /// declared variable. Undeclared names crash the process.
    fn operand_value(&self, process: &mut Process, token: &str) -> Result<u16, Step> {
        if token.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-') {
            return parse_u16_literal(token).ok_or_else(|| crash(process, None));
        }
        self.load_variable(process, token)
    }

    /// Current value of a declared variable, faulting its page in if needed.
    fn load_variable(&self, process: &mut Process, name: &str) -> Result<u16, Step> {
        let Some(offset) = symbols::lookup(process, name) else {
            warn!(pid = process.id, name, "use of undeclared variable");
            return Err(crash(process, None));
        };
        match self.mem.read(process.id, offset) {
            Ok((value, false)) => Ok(value),
            Ok((_, true)) => Err(page_fault(process)),
            Err(err) => Err(crash(process, err.faulting_address().or(Some(offset)))),
        }
    }

    /// Write a variable, declaring it on first use. A full symbol table turns
    /// the instruction into a logged no-op.
    fn store_variable(&self, process: &mut Process, name: &str, value: u16) -> Step {
        let Some(offset) = symbols::lookup_or_declare(process, name) else {
            return Step::Advanced;
        };
        match self.mem.write(process.id, offset, value) {
            Ok(false) => Step::Advanced,
            Ok(true) => page_fault(process),
            Err(err) => crash(process, err.faulting_address().or(Some(offset))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ArithKind {
    Add,
    Subtract,
}

/// Move the innermost instruction cursor forward: the active loop context's
/// sub-index, or the top-level program counter.
fn advance_cursor(process: &mut Process) {
    match process.for_stack.current_mut() {
        Some(ctx) => ctx.current_sub_index += 1,
        None => process.program_counter += 1,
    }
}

fn crash(process: &mut Process, faulting_address: Option<u16>) -> Step {
    process.state = ProcessState::Crashed;
    if faulting_address.is_some() {
        process.faulting_address = faulting_address;
    }
    Step::Crashed
}

fn page_fault(process: &mut Process) -> Step {
    process.state = ProcessState::Waiting;
    Step::PageFault
}

/// `"text"` -> `text`; anything else is not a quoted literal.
fn quoted_literal(token: &str) -> Option<&str> {
    token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| token.len() >= 2)
}

/// Decimal literal bounded to u16. Negatives are rejected, not wrapped.
fn parse_u16_literal(token: &str) -> Option<u16> {
    token.parse::<i64>().ok().and_then(|v| u16::try_from(v).ok())
}

/// Hexadecimal address, with or without a `0x` prefix, bounded to 16 bits.
fn parse_hex_address(token: &str) -> Option<u16> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u16::from_str_radix(digits, 16).ok()
}
