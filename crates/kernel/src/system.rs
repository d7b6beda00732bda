use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use memory::{MemoryManager, SnapshotWriter, DEFAULT_BACKING_FILE};
use types::{Clock, Instruction, Limits, MemError, Pid, Process, ProcessHandle};
use vm::{random_program, SynthParams};

use crate::config::Config;
use crate::generator::generator_loop;
use crate::sched::{lock_process, Scheduler};
use crate::worker::worker_loop;

/// Why an interactive `screen -s`/`-c` creation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// Memory size must be a power of two in 64..=65536.
    InvalidMemory(usize),
    /// Inline programs carry 1..=50 instructions.
    BadInstructionCount(usize),
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMemory(size) => {
                write!(f, "invalid memory size {size}: must be a power of two in 64..65536")
            }
            Self::BadInstructionCount(count) => {
                write!(f, "invalid instruction count {count}: must be 1..50")
            }
        }
    }
}

impl std::error::Error for CreateError {}

/// The whole emulated machine as one owned value.
///
/// Every thread gets an `Arc<System>` instead of reaching for globals: the
/// clock, the memory manager, the scheduler, and the process registry all
/// hang off it, each with its own interior synchronization. Spawned threads
/// are joined by `shutdown`, after which pending snapshot writes are
/// flushed.
#[derive(Debug)]
pub struct System {
    pub config: Config,
    pub clock: Arc<Clock>,
    pub memory: Arc<MemoryManager>,
    pub sched: Arc<Scheduler>,
    pub snapshots: Arc<SnapshotWriter>,
    pub(crate) running: AtomicBool,
    pub(crate) generating: AtomicBool,
    next_pid: AtomicU32,
    registry: Mutex<Vec<ProcessHandle>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl System {
    /// Bring the machine up with the default on-disk paths.
    pub fn start(config: Config) -> Result<Arc<Self>> {
        Self::start_with_paths(config, DEFAULT_BACKING_FILE, "snapshots")
    }

    /// Bring the machine up: construct the memory manager over `backing`,
    /// then spawn the clock, one worker per core, the generator, and the
    /// snapshot driver.
    pub fn start_with_paths(
        config: Config,
        backing: impl AsRef<Path>,
        snapshot_dir: impl Into<PathBuf>,
    ) -> Result<Arc<Self>> {
        let clock = Arc::new(Clock::new());
        let memory = Arc::new(
            MemoryManager::new(
                config.max_overall_mem,
                config.mem_per_frame,
                backing.as_ref(),
                Arc::clone(&clock),
            )
            .with_context(|| format!("opening backing store {}", backing.as_ref().display()))?,
        );
        let sched = Arc::new(Scheduler::new(
            config.scheduler,
            config.quantum_cycles,
            config.num_cpu,
        ));
        let sys = Arc::new(Self {
            clock,
            memory,
            sched,
            snapshots: Arc::new(SnapshotWriter::new(snapshot_dir.into())),
            running: AtomicBool::new(true),
            generating: AtomicBool::new(false),
            next_pid: AtomicU32::new(1),
            registry: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            config,
        });

        let mut threads = Vec::new();
        threads.push(spawn_named("clock", {
            let sys = Arc::clone(&sys);
            move || clock_loop(sys)
        })?);
        for core in 0..sys.config.num_cpu {
            threads.push(spawn_named(&format!("cpu-{core}"), {
                let sys = Arc::clone(&sys);
                move || worker_loop(core, sys)
            })?);
        }
        threads.push(spawn_named("generator", {
            let sys = Arc::clone(&sys);
            move || generator_loop(sys)
        })?);
        threads.push(spawn_named("snapshots", {
            let sys = Arc::clone(&sys);
            move || snapshot_loop(sys)
        })?);
        *lock(&sys.threads) = threads;

        info!(
            cores = sys.config.num_cpu,
            scheduler = %sys.config.scheduler,
            "system started"
        );
        Ok(sys)
    }

    /// Stop every thread and flush pending snapshot writes. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.generating.store(false, Ordering::Release);
        self.sched.shutdown();
        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for handle in threads {
            let _ = handle.join();
        }
        let flushed = self.snapshots.flush();
        info!(flushed_snapshots = flushed, "system stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Switch the batch generator on. Returns false if it already was.
    pub fn start_generator(&self) -> bool {
        !self.generating.swap(true, Ordering::AcqRel)
    }

    /// Switch the batch generator off. Returns false if it already was.
    pub fn stop_generator(&self) -> bool {
        self.generating.swap(false, Ordering::AcqRel)
    }

    pub fn generator_running(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    pub(crate) fn allocate_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    /// Snapshot of every process ever created, for the report generators.
    pub fn processes(&self) -> Vec<ProcessHandle> {
        lock(&self.registry).clone()
    }

    /// Find a process by exact name.
    pub fn find_process(&self, name: &str) -> Option<ProcessHandle> {
        lock(&self.registry)
            .iter()
            .find(|handle| lock_process(handle).name == name)
            .cloned()
    }

    /// Register a process and attempt admission; denied processes park in
    /// the pending queue for the generator to retry.
    pub fn submit(&self, process: Process) -> ProcessHandle {
        let handle = process.into_handle();
        lock(&self.registry).push(Arc::clone(&handle));
        self.try_admit(Arc::clone(&handle));
        handle
    }

    /// Create a process on behalf of the shell. The memory size is
    /// validated, the name is de-collided with `name(1)`, `name(2)`, …
    /// suffixes, and a missing program is synthesized at random.
    pub fn create_interactive(
        &self,
        base_name: &str,
        memory_bytes: usize,
        program: Option<Vec<Instruction>>,
    ) -> Result<ProcessHandle, CreateError> {
        if !memory_bytes.is_power_of_two()
            || !(Limits::MIN_PROC_MEMORY..=Limits::MAX_PROC_MEMORY).contains(&memory_bytes)
        {
            return Err(CreateError::InvalidMemory(memory_bytes));
        }
        if let Some(program) = &program {
            if program.is_empty() || program.len() > Limits::MAX_INLINE_INSTRUCTIONS {
                return Err(CreateError::BadInstructionCount(program.len()));
            }
        }

        let mut rng = StdRng::from_entropy();
        let name = self.unique_name(base_name);
        let pid = self.allocate_pid();
        let program = program.unwrap_or_else(|| {
            random_program(
                &mut rng,
                &name,
                &SynthParams {
                    min_ins: self.config.min_ins,
                    max_ins: self.config.max_ins,
                    max_for_depth: self.config.max_for_depth,
                    min_mem_per_proc: self.config.min_mem_per_proc,
                    max_mem_per_proc: self.config.max_mem_per_proc,
                },
            )
        });
        let mut process = Process::new(pid, name, memory_bytes, program);
        process.priority = rng.gen_range(0..100);
        Ok(self.submit(process))
    }

    fn unique_name(&self, base: &str) -> String {
        let registry = lock(&self.registry);
        let taken = |candidate: &str| {
            registry
                .iter()
                .any(|handle| lock_process(handle).name == candidate)
        };
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}({n})");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub(crate) fn try_admit(&self, handle: ProcessHandle) -> bool {
        let (pid, name, memory_required) = {
            let p = lock_process(&handle);
            (p.id, p.name.clone(), p.memory_required)
        };
        match self.memory.create_process(pid, &name, memory_required) {
            Ok(()) => {
                self.sched.enqueue(handle);
                true
            }
            Err(MemError::AdmissionDenied) => {
                info!(pid, %name, "memory full; process parked for retry");
                self.sched.lock().pending.push_back(handle);
                false
            }
            Err(err) => {
                warn!(pid, %name, %err, "admission failed");
                false
            }
        }
    }

    /// Re-attempt admission of parked processes, oldest first, stopping at
    /// the first one that is still denied.
    pub(crate) fn retry_pending(&self) {
        loop {
            let Some(handle) = self.sched.lock().pending.pop_front() else {
                return;
            };
            let (pid, name, memory_required) = {
                let p = lock_process(&handle);
                (p.id, p.name.clone(), p.memory_required)
            };
            match self.memory.create_process(pid, &name, memory_required) {
                Ok(()) => {
                    info!(pid, %name, "pending process admitted");
                    self.sched.enqueue(handle);
                }
                Err(_) => {
                    self.sched.lock().pending.push_front(handle);
                    return;
                }
            }
        }
    }
}

fn clock_loop(sys: Arc<System>) {
    while sys.running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(Limits::TICK_INTERVAL_MS));
        sys.clock.advance();
    }
}

fn snapshot_loop(sys: Arc<System>) {
    let mut last_snapshot_tick = 0u64;
    while sys.running.load(Ordering::Acquire) {
        let tick = sys.clock.now();
        if tick >= last_snapshot_tick + Limits::SNAPSHOT_INTERVAL_TICKS {
            last_snapshot_tick = tick;
            if let Some(text) = sys.memory.snapshot(tick) {
                sys.snapshots.enqueue(tick, text);
            }
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn spawn_named(name: &str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("spawning {name} thread"))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
