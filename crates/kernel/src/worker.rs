use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use tracing::debug;

use types::{Process, ProcessState};
use vm::{Interpreter, Step};

use crate::sched::{lock_process, Scheduler};
use crate::system::System;

/// How a worker's turn with a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// Program counter ran off the end with no loop context open.
    Finished,
    /// The interpreter marked the process CRASHED.
    Crashed,
    /// Sleep or a page fault parked the process; it re-queues at the tail.
    Waiting,
    /// Quantum expiry, preemption, or shutdown; it re-queues at the tail.
    Yielded,
}

/// One CPU core. Drains the ready queue, runs the interpreter one
/// instruction at a time, and routes every yield back through the queue.
///
/// Locking discipline for the whole loop: the queue lock is only held while
/// selecting and while re-queueing, never across an instruction; the process
/// lock is held per instruction; the memory manager serializes itself. That
/// ordering (queue, then process, then manager) is what rules deadlock out.
pub(crate) fn worker_loop(core: u32, sys: Arc<System>) {
    let interpreter = Interpreter::new(
        Arc::clone(&sys.memory),
        Arc::clone(&sys.clock),
        sys.config.max_for_depth,
    );

    loop {
        // Wait for work; the shutdown latch is re-tested under the lock.
        let handle = {
            let mut state = sys.sched.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(handle) = Scheduler::select_next(&mut state, sys.sched.policy) {
                    state.core_busy[core as usize] = true;
                    break handle;
                }
                state = sys.sched.wait(state);
            }
        };

        {
            let mut p = lock_process(&handle);
            p.state = ProcessState::Running;
            p.assigned_core = Some(core);
            if p.start_time.is_none() {
                p.start_time = Some(Local::now());
            }
        }

        let mut executed = 0u32;
        let turn = loop {
            let step = {
                let mut p = lock_process(&handle);
                if p.at_end() {
                    break Turn::Finished;
                }
                match touch_fetch_page(&sys, &mut p) {
                    Ok(false) => {}
                    Ok(true) => break Turn::Waiting,
                    Err(turn) => break turn,
                }
                interpreter.step(&mut p)
            };
            match step {
                Step::Crashed => break Turn::Crashed,
                Step::Waiting | Step::PageFault => break Turn::Waiting,
                Step::Advanced => {}
            }
            executed += 1;
            if sys.config.delay_per_exec > 0 {
                thread::sleep(Duration::from_millis(sys.config.delay_per_exec));
            }
            if !sys.running.load(Ordering::Acquire) {
                break Turn::Yielded;
            }
            if sys.sched.should_yield(&handle, executed) {
                break Turn::Yielded;
            }
        };

        // Turn epilogue, under the queue lock: release the core, record the
        // transition, and either re-queue or retire the process.
        let retired_pid = {
            let mut state = sys.sched.lock();
            state.core_busy[core as usize] = false;
            let mut p = lock_process(&handle);
            p.last_core = Some(core);
            p.assigned_core = None;
            let pid = p.id;
            let retired = match turn {
                Turn::Finished => {
                    p.state = ProcessState::Finished;
                    p.end_time = Some(Local::now());
                    debug!(pid, core, "process finished");
                    true
                }
                Turn::Crashed => {
                    p.end_time = Some(Local::now());
                    debug!(pid, core, fault = ?p.faulting_address, "process crashed");
                    true
                }
                Turn::Waiting => {
                    // Still inside a sleep window stays WAITING; a serviced
                    // page fault goes straight back to READY.
                    if p.sleep_until_tick <= sys.clock.now() {
                        p.state = ProcessState::Ready;
                    }
                    drop(p);
                    state.ready.push_back(Arc::clone(&handle));
                    false
                }
                Turn::Yielded => {
                    p.state = ProcessState::Ready;
                    drop(p);
                    state.ready.push_back(Arc::clone(&handle));
                    false
                }
            };
            if !retired {
                sys.sched.notify_one();
            }
            retired.then_some(pid)
        };

        if let Some(pid) = retired_pid {
            sys.memory.remove_process(pid);
        }

        // A turn that made no progress (a still-sleeping process on an
        // otherwise idle queue) would spin; give the clock a chance.
        if executed == 0 && turn == Turn::Waiting {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Reserve the page holding the next instruction. The fetch address is
/// modeled as `pc * avg_instruction_size`, wrapped into the process's span.
fn touch_fetch_page(sys: &System, p: &mut Process) -> Result<bool, Turn> {
    let addr = (p.program_counter * sys.config.avg_instruction_size as usize) % p.memory_required;
    match sys.memory.touch_page(p.id, addr as u16) {
        Ok(false) => Ok(false),
        Ok(true) => {
            p.state = ProcessState::Waiting;
            Ok(true)
        }
        Err(err) => {
            p.state = ProcessState::Crashed;
            p.faulting_address = err.faulting_address();
            Err(Turn::Crashed)
        }
    }
}
