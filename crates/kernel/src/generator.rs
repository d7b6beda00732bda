use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use types::Process;
use vm::{random_memory_size, random_program, SynthParams};

use crate::system::System;

/// Batch process source. On every tick divisible by `batch-process-freq`
/// (while the generator is switched on) it synthesizes one process and asks
/// the memory manager to admit it; denied processes park in the pending
/// queue and are retried, oldest first, on subsequent ticks.
pub(crate) fn generator_loop(sys: Arc<System>) {
    let mut rng = StdRng::from_entropy();
    let mut last_gen_tick = 0u64;

    while sys.running.load(Ordering::Acquire) {
        sys.retry_pending();

        if sys.generating.load(Ordering::Acquire) {
            let tick = sys.clock.now();
            if tick > last_gen_tick && tick % sys.config.batch_process_freq == 0 {
                last_gen_tick = tick;
                let process = synthesize(&mut rng, &sys);
                info!(pid = process.id, name = %process.name, "generated process");
                sys.submit(process);
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn synthesize(rng: &mut StdRng, sys: &System) -> Process {
    let params = SynthParams {
        min_ins: sys.config.min_ins,
        max_ins: sys.config.max_ins,
        max_for_depth: sys.config.max_for_depth,
        min_mem_per_proc: sys.config.min_mem_per_proc,
        max_mem_per_proc: sys.config.max_mem_per_proc,
    };
    let pid = sys.allocate_pid();
    let name = format!("p{pid}");
    let memory = random_memory_size(rng, &params);
    let program = random_program(rng, &name, &params);
    let mut process = Process::new(pid, name, memory, program);
    process.priority = rng.gen_range(0..100);
    process
}
