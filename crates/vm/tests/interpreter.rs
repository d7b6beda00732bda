use std::path::PathBuf;
use std::sync::Arc;

use memory::MemoryManager;
use types::{Clock, Instruction, Opcode, Process, ProcessState};
use vm::{parse_program, symbols, Interpreter, Step};

fn temp_backing(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("emu-vm-{tag}-{}.bin", std::process::id()))
}

struct Fixture {
    interpreter: Interpreter,
    mem: Arc<MemoryManager>,
    clock: Arc<Clock>,
}

fn fixture(tag: &str) -> Fixture {
    let clock = Arc::new(Clock::new());
    let mem = Arc::new(MemoryManager::new(1024, 64, temp_backing(tag), Arc::clone(&clock)).unwrap());
    Fixture {
        interpreter: Interpreter::new(Arc::clone(&mem), Arc::clone(&clock), 3),
        mem,
        clock,
    }
}

fn admit(fx: &Fixture, pid: u32, memory: usize, program: Vec<Instruction>) -> Process {
    let process = Process::new(pid, format!("p{pid}"), memory, program);
    fx.mem.create_process(pid, &process.name, memory).unwrap();
    process
}

/// Drive a process to a terminal state or the end of its program, retrying
/// through page faults the way the worker would.
fn run_to_completion(fx: &Fixture, process: &mut Process) {
    for _ in 0..10_000 {
        if process.state == ProcessState::Crashed || process.at_end() {
            return;
        }
        match fx.interpreter.step(process) {
            Step::Waiting => {
                // Sleeping: nudge the clock instead of spinning forever.
                if process.sleep_until_tick > fx.clock.now() {
                    fx.clock.advance();
                }
            }
            Step::Advanced | Step::PageFault | Step::Crashed => {}
        }
    }
    panic!("program did not settle");
}

fn variable(fx: &Fixture, process: &Process, name: &str) -> u16 {
    let offset = symbols::lookup(process, name).expect("variable declared");
    fx.mem.read(process.id, offset).unwrap().0
}

#[test]
fn add_saturates_at_u16_max() {
    let fx = fixture("add-sat");
    let program = parse_program("DECLARE a 65000; ADD b a 1000", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_ne!(p.state, ProcessState::Crashed);
    assert_eq!(variable(&fx, &p, "b"), u16::MAX);
}

#[test]
fn subtract_wraps_modulo_two_sixteen() {
    let fx = fixture("sub-wrap");
    let program = parse_program("DECLARE a 3; SUBTRACT b a 5", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(variable(&fx, &p, "b"), u16::MAX - 1);
}

#[test]
fn print_of_undeclared_variable_crashes() {
    let fx = fixture("undeclared");
    let program = parse_program("PRINT v1", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(p.state, ProcessState::Crashed);
}

#[test]
fn arithmetic_on_undeclared_operand_crashes() {
    let fx = fixture("undeclared-op");
    let program = parse_program("DECLARE a 1; ADD a a missing", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(p.state, ProcessState::Crashed);
}

#[test]
fn print_substitutes_declared_variables() {
    let fx = fixture("print");
    let program = parse_program("DECLARE x 7; PRINT(\"x is \" + x)", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(p.logs.len(), 1);
    assert!(p.logs[0].ends_with("\"x is 7\""), "log was: {}", p.logs[0]);
}

#[test]
fn symbol_table_caps_at_thirty_two_variables() {
    let fx = fixture("symtab");
    let mut src: Vec<String> = (1..=33).map(|i| format!("DECLARE v{i} {i}")).collect();
    src.push("PRINT v33".to_string());
    let program = parse_program(&src.join("; "), 3).unwrap();
    let mut p = admit(&fx, 1, 1024, program);
    run_to_completion(&fx, &mut p);

    // The 33rd DECLARE was a no-op; reading it afterwards is fatal.
    assert_eq!(p.variable_offsets.len(), 32);
    assert!(!p.variable_offsets.contains_key("v33"));
    assert_eq!(p.state, ProcessState::Crashed);
}

#[test]
fn for_loop_repeats_its_body() {
    let fx = fixture("for");
    let program = parse_program("DECLARE x 0; FOR 3 [ ADD x x 1 ]", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(variable(&fx, &p, "x"), 3);
    assert!(p.for_stack.is_empty());
}

#[test]
fn nested_for_multiplies_repeats() {
    let fx = fixture("for-nested");
    let program = parse_program("DECLARE x 0; FOR 2 [ FOR 3 [ ADD x x 1 ] ]", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(variable(&fx, &p, "x"), 6);
}

#[test]
fn zero_count_for_is_a_noop() {
    let fx = fixture("for-zero");
    let program = parse_program("DECLARE x 1; FOR 0 [ ADD x x 1 ]; ADD x x 10", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(variable(&fx, &p, "x"), 11);
}

#[test]
fn sleep_parks_until_the_clock_catches_up() {
    let fx = fixture("sleep");
    let program = parse_program("SLEEP 5; PRINT \"done\"", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);

    assert_eq!(fx.interpreter.step(&mut p), Step::Waiting);
    assert_eq!(p.state, ProcessState::Waiting);
    assert_eq!(p.sleep_until_tick, 5);

    // Still asleep: repeated turns keep yielding.
    assert_eq!(fx.interpreter.step(&mut p), Step::Waiting);
    for _ in 0..5 {
        fx.clock.advance();
    }
    assert_eq!(fx.interpreter.step(&mut p), Step::Advanced);
    assert_eq!(p.state, ProcessState::Running);
    assert_eq!(p.logs.len(), 1);
}

#[test]
fn sleep_longer_than_255_crashes() {
    let fx = fixture("sleep-bad");
    let program = parse_program("SLEEP 300", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    assert_eq!(fx.interpreter.step(&mut p), Step::Crashed);
}

#[test]
fn write_then_read_round_trips_through_memory() {
    let fx = fixture("rw");
    let program = parse_program("WRITE 0x40 123; READ r 0x40; PRINT(\"r=\" + r)", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_ne!(p.state, ProcessState::Crashed);
    assert_eq!(variable(&fx, &p, "r"), 123);
    assert!(p.logs[0].contains("r=123"));
}

#[test]
fn first_data_access_reports_a_page_fault_then_retries() {
    let fx = fixture("fault-retry");
    let program = parse_program("WRITE 0x40 9", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);

    assert_eq!(fx.interpreter.step(&mut p), Step::PageFault);
    assert_eq!(p.state, ProcessState::Waiting);
    assert_eq!(p.program_counter, 0, "faulting instruction must not retire");

    assert_eq!(fx.interpreter.step(&mut p), Step::Advanced);
    assert_eq!(p.program_counter, 1);
    assert_eq!(fx.mem.read(1, 0x40).unwrap().0, 9);
}

#[test]
fn out_of_bounds_write_records_the_faulting_address() {
    let fx = fixture("oob");
    let program = parse_program("WRITE 0xFF00 1", 3).unwrap();
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    assert_eq!(p.state, ProcessState::Crashed);
    assert_eq!(p.faulting_address, Some(0xFF00));
}

#[test]
fn malformed_operands_crash() {
    for (tag, src) in [
        ("bad-declare", "DECLARE x abc"),
        ("bad-hex", "WRITE zz 5"),
        ("bad-args", "ADD x 1"),
        ("bad-neg", "DECLARE x -4"),
    ] {
        let fx = fixture(tag);
        let program = parse_program(src, 3).unwrap();
        let mut p = admit(&fx, 1, 128, program);
        run_to_completion(&fx, &mut p);
        assert_eq!(p.state, ProcessState::Crashed, "{src} should crash");
    }
}

#[test]
fn declare_stores_through_the_memory_manager() {
    let fx = fixture("declare-mem");
    let program = vec![Instruction::new(Opcode::Declare, vec!["x", "41"])];
    let mut p = admit(&fx, 1, 128, program);
    run_to_completion(&fx, &mut p);
    let offset = symbols::lookup(&p, "x").unwrap();
    assert_eq!(offset, 0);
    assert_eq!(fx.mem.read(1, offset).unwrap().0, 41);
}
