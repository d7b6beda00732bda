use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::rstest;

use kernel::{Config, Scheduler, System};
use types::{Instruction, Opcode, Process, ProcessHandle, ProcessState, SchedulerPolicy};
use vm::parse_program;

fn temp_path(tag: &str, what: &str) -> PathBuf {
    std::env::temp_dir().join(format!("emu-kernel-{tag}-{what}-{}", std::process::id()))
}

fn print_program(words: &[&str]) -> Vec<Instruction> {
    words
        .iter()
        .map(|w| Instruction::new(Opcode::Print, vec![format!("\"{w}\"")]))
        .collect()
}

fn handle_with(pid: u32, instructions: usize, pc: usize, priority: u32) -> ProcessHandle {
    let program = print_program(&vec!["x"; instructions]);
    let mut process = Process::new(pid, format!("p{pid}"), 128, program);
    process.program_counter = pc;
    process.priority = priority;
    process.into_handle()
}

fn lock(handle: &ProcessHandle) -> std::sync::MutexGuard<'_, types::Process> {
    handle.lock().unwrap()
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

// --- selection -----------------------------------------------------------

#[rstest]
#[case::fcfs_takes_head(SchedulerPolicy::Fcfs, 1)]
#[case::rr_takes_head(SchedulerPolicy::Rr, 1)]
#[case::sjf_takes_shortest(SchedulerPolicy::Sjf, 3)]
#[case::srtf_takes_least_remaining(SchedulerPolicy::Srtf, 2)]
#[case::priority_takes_lowest(SchedulerPolicy::PriorityNonpreemptive, 4)]
fn selection_respects_the_policy(#[case] policy: SchedulerPolicy, #[case] expected_pid: u32) {
    let sched = Scheduler::new(policy, 1, 1);
    {
        let mut state = sched.lock();
        // pid: (len, pc, priority)
        state.ready.push_back(handle_with(1, 8, 0, 50)); // remaining 8
        state.ready.push_back(handle_with(2, 9, 7, 40)); // remaining 2
        state.ready.push_back(handle_with(3, 4, 0, 30)); // shortest program
        state.ready.push_back(handle_with(4, 6, 1, 10)); // best priority
    }
    let mut state = sched.lock();
    let selected = Scheduler::select_next(&mut state, policy).unwrap();
    assert_eq!(lock(&selected).id, expected_pid);
    assert_eq!(state.ready.len(), 3);
}

#[test]
fn sjf_breaks_ties_by_ascending_pid() {
    let sched = Scheduler::new(SchedulerPolicy::Sjf, 1, 1);
    {
        let mut state = sched.lock();
        state.ready.push_back(handle_with(7, 5, 0, 0));
        state.ready.push_back(handle_with(2, 5, 0, 0));
        state.ready.push_back(handle_with(9, 5, 0, 0));
    }
    let mut state = sched.lock();
    let selected = Scheduler::select_next(&mut state, SchedulerPolicy::Sjf).unwrap();
    assert_eq!(lock(&selected).id, 2);
}

#[test]
fn non_selected_processes_keep_their_relative_order() {
    let sched = Scheduler::new(SchedulerPolicy::Sjf, 1, 1);
    {
        let mut state = sched.lock();
        state.ready.push_back(handle_with(1, 9, 0, 0));
        state.ready.push_back(handle_with(2, 3, 0, 0));
        state.ready.push_back(handle_with(3, 8, 0, 0));
    }
    let mut state = sched.lock();
    let selected = Scheduler::select_next(&mut state, SchedulerPolicy::Sjf).unwrap();
    assert_eq!(lock(&selected).id, 2);
    let rest: Vec<u32> = state.ready.iter().map(|h| lock(h).id).collect();
    assert_eq!(rest, vec![1, 3]);
}

#[test]
fn quantum_expiry_forces_a_yield() {
    let sched = Scheduler::new(SchedulerPolicy::Rr, 3, 1);
    let current = handle_with(1, 10, 0, 0);
    assert!(!sched.should_yield(&current, 2));
    assert!(sched.should_yield(&current, 3));
}

#[test]
fn preemptive_priority_yields_to_a_strictly_better_process() {
    let sched = Scheduler::new(SchedulerPolicy::PriorityPreemptive, 1, 1);
    let current = handle_with(1, 10, 0, 50);
    assert!(!sched.should_yield(&current, 1), "empty queue never preempts");

    sched.lock().ready.push_back(handle_with(2, 10, 0, 60));
    assert!(!sched.should_yield(&current, 1), "worse priority never preempts");

    sched.lock().ready.push_back(handle_with(3, 10, 0, 10));
    assert!(sched.should_yield(&current, 1));
}

#[test]
fn equal_keys_do_not_preempt() {
    let sched = Scheduler::new(SchedulerPolicy::PriorityPreemptive, 1, 1);
    let current = handle_with(1, 10, 0, 50);
    sched.lock().ready.push_back(handle_with(2, 10, 0, 50));
    assert!(!sched.should_yield(&current, 1));
}

// --- end-to-end ----------------------------------------------------------

fn start_system(tag: &str, mutate: impl FnOnce(&mut Config)) -> Arc<System> {
    let mut config = Config::default();
    config.num_cpu = 1;
    config.delay_per_exec = 0;
    config.max_overall_mem = 1024;
    config.mem_per_frame = 64;
    mutate(&mut config);
    System::start_with_paths(config, temp_path(tag, "backing"), temp_path(tag, "snapshots")).unwrap()
}

/// Round-robin with quantum 2: both processes finish, on the only core,
/// with their own logs in program order.
#[test]
fn round_robin_runs_both_processes_to_completion() {
    let sys = start_system("rr", |c| {
        c.scheduler = SchedulerPolicy::Rr;
        c.quantum_cycles = 2;
    });

    let p1 = sys
        .create_interactive("P1", 256, Some(print_program(&["a", "b", "c"])))
        .unwrap();
    let p2 = sys
        .create_interactive("P2", 256, Some(print_program(&["x", "y", "z"])))
        .unwrap();

    let finished = wait_until(Duration::from_secs(10), || {
        lock(&p1).is_finished() && lock(&p2).is_finished()
    });
    assert!(finished, "both processes should finish");

    for (handle, words) in [(&p1, ["a", "b", "c"]), (&p2, ["x", "y", "z"])] {
        let p = lock(handle);
        assert_eq!(p.state, ProcessState::Finished);
        assert_eq!(p.logs.len(), 3);
        for (line, word) in p.logs.iter().zip(words) {
            assert!(line.ends_with(&format!("\"{word}\"")), "log {line} vs {word}");
        }
        assert_eq!(p.last_core, Some(0));
        assert_eq!(p.assigned_core, None);
        assert!(p.end_time.is_some());
    }

    sys.shutdown();
}

/// SLEEP parks the process for the requested ticks before it resumes.
#[test]
fn sleep_is_honored_in_ticks() {
    let sys = start_system("sleep", |c| {
        c.scheduler = SchedulerPolicy::Fcfs;
    });

    let start_tick = sys.clock.now();
    let program = parse_program("SLEEP 10; PRINT \"done\"", 3).unwrap();
    let handle = sys.create_interactive("sleeper", 256, Some(program)).unwrap();

    // Well before the wake tick the process cannot have finished.
    while sys.clock.now() < start_tick + 5 {
        assert!(!lock(&handle).is_finished());
        std::thread::sleep(Duration::from_millis(5));
    }

    let finished = wait_until(Duration::from_secs(10), || lock(&handle).is_finished());
    assert!(finished, "sleeper should eventually finish");
    assert!(
        sys.clock.now() >= start_tick + 10,
        "finished before its wake tick"
    );
    assert_eq!(lock(&handle).logs.len(), 1);

    sys.shutdown();
}

/// A crashed process keeps its fault address and end time for `screen -r`.
#[test]
fn crash_records_fault_address_and_end_time() {
    let sys = start_system("crash", |c| {
        c.scheduler = SchedulerPolicy::Fcfs;
    });

    let program = parse_program("PRINT v1", 3).unwrap();
    let handle = sys.create_interactive("crasher", 256, Some(program)).unwrap();

    let finished = wait_until(Duration::from_secs(10), || lock(&handle).is_finished());
    assert!(finished);
    let p = lock(&handle);
    assert_eq!(p.state, ProcessState::Crashed);
    assert!(p.end_time.is_some());

    sys.shutdown();
}

/// Admission retry: with two frames, the third two-page process parks in
/// the pending queue and is admitted once an earlier process retires.
#[test]
fn denied_admission_is_retried_until_capacity_frees_up() {
    let sys = start_system("retry", |c| {
        c.scheduler = SchedulerPolicy::Fcfs;
        c.max_overall_mem = 128;
        c.mem_per_frame = 64;
    });

    let sleepy = parse_program("SLEEP 20; PRINT \"bye\"", 3).unwrap();
    let quick = parse_program("PRINT \"hi\"", 3).unwrap();

    let p1 = sys.create_interactive("a", 128, Some(sleepy.clone())).unwrap();
    let p2 = sys.create_interactive("b", 128, Some(sleepy)).unwrap();
    let p3 = sys.create_interactive("c", 128, Some(quick)).unwrap();

    // Both frames are subscribed; the third process must be parked.
    assert_eq!(sys.memory.admitted_count(), 2);
    assert!(!lock(&p3).is_finished());

    let all_done = wait_until(Duration::from_secs(15), || {
        lock(&p1).is_finished() && lock(&p2).is_finished() && lock(&p3).is_finished()
    });
    assert!(all_done, "pending process should be admitted and finish");

    sys.shutdown();
}

/// The generator produces processes on its cadence once started, and stops
/// producing when stopped.
#[test]
fn generator_toggles_cleanly() {
    let sys = start_system("generator", |c| {
        c.scheduler = SchedulerPolicy::Fcfs;
        c.batch_process_freq = 2;
        c.min_ins = 3;
        c.max_ins = 6;
        c.min_mem_per_proc = 64;
        c.max_mem_per_proc = 256;
    });

    assert!(sys.start_generator());
    assert!(!sys.start_generator(), "second start reports already running");

    let produced = wait_until(Duration::from_secs(10), || sys.processes().len() >= 3);
    assert!(produced, "generator should create processes");

    assert!(sys.stop_generator());
    let count = sys.processes().len();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(sys.processes().len(), count, "no growth after scheduler-stop");

    sys.shutdown();
}
