use std::fmt::Write as _;

use types::ProcessState;

use crate::sched::lock_process;
use crate::system::System;

/// The `screen -ls` / `report-util` system report.
pub fn system_report(sys: &System) -> String {
    let (cores_used, total_cores) = {
        let state = sys.sched.lock();
        (
            state.core_busy.iter().filter(|&&busy| busy).count(),
            state.core_busy.len(),
        )
    };
    let utilization = if total_cores > 0 {
        cores_used * 100 / total_cores
    } else {
        0
    };

    let mut out = String::new();
    let _ = writeln!(out, "CPU utilization: {utilization}%");
    let _ = writeln!(out, "Cores used: {cores_used}");
    let _ = writeln!(out, "Cores available: {}", total_cores - cores_used);
    out.push('\n');
    let _ = writeln!(out, "---------------------------------------------------------");
    let _ = writeln!(out, "Running processes:");
    for handle in sys.processes() {
        let p = lock_process(&handle);
        if p.is_finished() || p.assigned_core.is_none() {
            continue;
        }
        let core = p.assigned_core.map(|c| c.to_string()).unwrap_or_default();
        let started = p
            .start_time
            .map(|t| t.format("(%m/%d/%Y %I:%M:%S%p)").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<12}{:<25}Core: {:<5}{} / {}",
            p.name,
            started,
            core,
            p.program_counter,
            p.instructions.len()
        );
    }
    out.push('\n');
    let _ = writeln!(out, "Finished processes:");
    for handle in sys.processes() {
        let p = lock_process(&handle);
        if !p.is_finished() {
            continue;
        }
        let status = match p.state {
            ProcessState::Crashed => "Crashed",
            _ => "Finished",
        };
        let ended = p
            .end_time
            .map(|t| t.format("(%m/%d/%Y %I:%M:%S%p)").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<12}{:<25}{:<10}{} / {}",
            p.name,
            ended,
            status,
            p.program_counter.min(p.instructions.len()),
            p.instructions.len()
        );
    }
    let _ = writeln!(out, "---------------------------------------------------------");
    out
}

/// The `vmstat` memory and tick counters.
pub fn vmstat(sys: &System) -> String {
    let stats = sys.memory.stats();
    let mut out = String::new();
    let _ = writeln!(out, "Total memory: {} bytes", stats.total_memory);
    let _ = writeln!(out, "Used memory: {} bytes", stats.used_bytes());
    let _ = writeln!(out, "Free memory: {} bytes", stats.free_bytes());
    let _ = writeln!(
        out,
        "Frames: {} used / {} free",
        stats.used_frames,
        stats.free_frames()
    );
    let _ = writeln!(out, "CPU ticks: {}", sys.clock.now());
    let _ = writeln!(out, "Page faults: {}", stats.page_faults);
    let _ = writeln!(out, "Dirty evictions: {}", stats.dirty_evictions);
    out
}

/// The `process-smi` compact page-table view across live processes.
pub fn process_smi(sys: &System) -> String {
    let stats = sys.memory.stats();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Memory usage: {} / {} bytes",
        stats.used_bytes(),
        stats.total_memory
    );
    for handle in sys.processes() {
        let (pid, name, finished) = {
            let p = lock_process(&handle);
            (p.id, p.name.clone(), p.is_finished())
        };
        if finished {
            continue;
        }
        let Ok(pages) = sys.memory.process_pages(pid) else {
            continue;
        };
        let rendered: Vec<String> = pages.iter().map(|view| view.label(pid)).collect();
        let _ = writeln!(out, "Process {pid} ({name}): {}", rendered.join(" "));
    }
    out
}
