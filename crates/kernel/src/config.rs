use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use types::{Limits, SchedulerPolicy};

/// Runtime tunables, one `key value` pair per line in the config file.
/// Values may be double-quoted. Unknown keys are ignored; invalid values are
/// replaced by defaults with a diagnostic, so loading never fails once the
/// file itself is readable.
#[derive(Debug, Clone)]
pub struct Config {
    pub num_cpu: u32,
    pub scheduler: SchedulerPolicy,
    pub quantum_cycles: u32,
    pub batch_process_freq: u64,
    pub min_ins: usize,
    pub max_ins: usize,
    /// Cooperative throttle between instructions, milliseconds.
    pub delay_per_exec: u64,
    pub max_overall_mem: usize,
    pub mem_per_frame: usize,
    pub min_mem_per_proc: usize,
    pub max_mem_per_proc: usize,
    /// Modeled size of one instruction in the fetch stream.
    pub avg_instruction_size: u16,
    pub max_for_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulerPolicy::Rr,
            quantum_cycles: 5,
            batch_process_freq: 1,
            min_ins: 8,
            max_ins: 32,
            delay_per_exec: 0,
            max_overall_mem: 16384,
            mem_per_frame: 256,
            min_mem_per_proc: 64,
            max_mem_per_proc: 1024,
            avg_instruction_size: Limits::DEFAULT_AVG_INSTRUCTION_SIZE,
            max_for_depth: Limits::DEFAULT_MAX_FOR_DEPTH,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not open configuration file {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Parse the key/value text. Every field falls back to its default on a
    /// bad value, with a warning naming the key.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                warn!(line, "config line has no value; ignored");
                continue;
            };
            let value = value.trim().trim_matches('"');
            config.apply(key, value);
        }
        config.reconcile();
        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "num-cpu" => set(key, value, &mut self.num_cpu, |v| (1..=128).contains(v)),
            "scheduler" => match SchedulerPolicy::parse(value) {
                Some(policy) => self.scheduler = policy,
                None => warn!(key, value, "invalid value; keeping default"),
            },
            "quantum-cycles" => set(key, value, &mut self.quantum_cycles, |&v| v >= 1),
            "batch-process-freq" => set(key, value, &mut self.batch_process_freq, |&v| v >= 1),
            "min-ins" => set(key, value, &mut self.min_ins, |&v| v >= 1),
            "max-ins" => set(key, value, &mut self.max_ins, |&v| v >= 1),
            "delay-per-exec" => set(key, value, &mut self.delay_per_exec, |_| true),
            "max-overall-mem" => set(key, value, &mut self.max_overall_mem, |&v: &usize| {
                v.is_power_of_two() && (Limits::MIN_PROC_MEMORY..=Limits::MAX_PROC_MEMORY).contains(&v)
            }),
            "mem-per-frame" => set(key, value, &mut self.mem_per_frame, |&v: &usize| v.is_power_of_two()),
            "min-mem-per-proc" => set(key, value, &mut self.min_mem_per_proc, |&v| v > 0),
            "max-mem-per-proc" => set(key, value, &mut self.max_mem_per_proc, |&v| v > 0),
            "avg-instruction-size" => set(key, value, &mut self.avg_instruction_size, |&v| v >= 1),
            "max-for-depth" => set(key, value, &mut self.max_for_depth, |_| true),
            _ => debug!(key, "unknown config key ignored"),
        }
    }

    /// Cross-field fixups after all keys are applied.
    fn reconcile(&mut self) {
        if self.min_ins > self.max_ins {
            warn!(
                min_ins = self.min_ins,
                max_ins = self.max_ins,
                "min-ins and max-ins inverted; swapping"
            );
            std::mem::swap(&mut self.min_ins, &mut self.max_ins);
        }
        if self.min_mem_per_proc > self.max_mem_per_proc {
            warn!("min-mem-per-proc and max-mem-per-proc inverted; swapping");
            std::mem::swap(&mut self.min_mem_per_proc, &mut self.max_mem_per_proc);
        }
        if self.mem_per_frame > self.max_overall_mem {
            warn!(
                mem_per_frame = self.mem_per_frame,
                max_overall_mem = self.max_overall_mem,
                "mem-per-frame exceeds max-overall-mem; using defaults for both"
            );
            let defaults = Self::default();
            self.mem_per_frame = defaults.mem_per_frame;
            self.max_overall_mem = defaults.max_overall_mem;
        }
    }
}

/// Assign a parsed value when it passes validation, otherwise warn and keep
/// the default already in place.
fn set<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T, valid: impl Fn(&T) -> bool) {
    match value.parse::<T>() {
        Ok(parsed) if valid(&parsed) => *slot = parsed,
        _ => warn!(key, value, "invalid value; keeping default"),
    }
}
