use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use types::{Pid, Process, ProcessHandle, SchedulerPolicy};

/// Shared scheduler state: the runnable queue, per-core occupancy, processes
/// parked for admission, and the shutdown latch. One mutex plus one condvar
/// guard all of it; workers sleep on the condvar when the queue is empty.
#[derive(Debug, Default)]
pub struct SchedState {
    pub ready: VecDeque<ProcessHandle>,
    pub core_busy: Vec<bool>,
    /// Processes whose admission was denied, awaiting a retry in FIFO order.
    pub pending: VecDeque<ProcessHandle>,
    pub shutdown: bool,
}

#[derive(Debug)]
pub struct Scheduler {
    pub policy: SchedulerPolicy,
    pub quantum_cycles: u32,
    state: Mutex<SchedState>,
    cv: Condvar,
}

impl Scheduler {
    pub fn new(policy: SchedulerPolicy, quantum_cycles: u32, num_cpu: u32) -> Self {
        Self {
            policy,
            quantum_cycles,
            state: Mutex::new(SchedState {
                core_busy: vec![false; num_cpu as usize],
                ..SchedState::default()
            }),
            cv: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SchedState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Block until there is work or the system is shutting down.
    pub fn wait<'a>(&self, guard: MutexGuard<'a, SchedState>) -> MutexGuard<'a, SchedState> {
        match self.cv.wait(guard) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn notify_one(&self) {
        self.cv.notify_one();
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Append a runnable process and wake one worker.
    pub fn enqueue(&self, handle: ProcessHandle) {
        self.lock().ready.push_back(handle);
        self.cv.notify_one();
    }

    /// Flip the shutdown latch and wake everyone. Idle workers re-test the
    /// latch under the lock, so no wakeup can be lost.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.cv.notify_all();
    }

    /// Remove and return the next process according to the policy.
    ///
    /// FCFS and RR take the head. The comparing policies scan the queue for
    /// the minimal key and remove just that entry, leaving everyone else in
    /// their original relative order.
    pub fn select_next(state: &mut SchedState, policy: SchedulerPolicy) -> Option<ProcessHandle> {
        match policy {
            SchedulerPolicy::Fcfs | SchedulerPolicy::Rr => state.ready.pop_front(),
            _ => {
                let best = state
                    .ready
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, handle)| selection_key(policy, &lock_process(handle)))?
                    .0;
                state.ready.remove(best)
            }
        }
    }

    /// Decide whether the running process must give up its core: quantum
    /// expiry under RR, or a strictly better-keyed ready process under the
    /// preemptive policies.
    pub fn should_yield(&self, current: &ProcessHandle, executed: u32) -> bool {
        if self.policy.uses_quantum() && executed >= self.quantum_cycles {
            return true;
        }
        if !self.policy.is_preemptive() {
            return false;
        }
        let state = self.lock();
        let Some(best) = state
            .ready
            .iter()
            .map(|handle| selection_key(self.policy, &lock_process(handle)).0)
            .min()
        else {
            return false;
        };
        let current_key = selection_key(self.policy, &lock_process(current)).0;
        best < current_key
    }
}

/// Ordering key for the comparing policies; ties always break by ascending
/// pid. FCFS/RR never call this.
fn selection_key(policy: SchedulerPolicy, process: &Process) -> (u64, Pid) {
    let primary = match policy {
        SchedulerPolicy::Sjf => process.instructions.len() as u64,
        SchedulerPolicy::Srtf => process.remaining() as u64,
        SchedulerPolicy::PriorityNonpreemptive | SchedulerPolicy::PriorityPreemptive => {
            u64::from(process.priority)
        }
        SchedulerPolicy::Fcfs | SchedulerPolicy::Rr => 0,
    };
    (primary, process.id)
}

/// Lock a process record, recovering from poisoning.
pub(crate) fn lock_process(handle: &ProcessHandle) -> std::sync::MutexGuard<'_, Process> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
