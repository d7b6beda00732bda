use std::io::{self, BufRead, Write};
use std::sync::{Arc, MutexGuard};

use kernel::System;
use types::{Process, ProcessHandle, ProcessState};

pub fn lock(handle: &ProcessHandle) -> MutexGuard<'_, Process> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// `screen -r <name>`: reattach to a process. A crashed process reports its
/// fault address and the view is declined.
pub fn resume(sys: &Arc<System>, name: &str) {
    let Some(handle) = sys.find_process(name) else {
        eprintln!("Process '{name}' not found.");
        return;
    };
    let declined = {
        let p = lock(&handle);
        if p.state == ProcessState::Crashed {
            let fault = p
                .faulting_address
                .map(|addr| format!("{addr:#06x}"))
                .unwrap_or_else(|| "unknown address".to_string());
            let ended = p
                .end_time
                .map(|t| t.format("(%m/%d/%Y %I:%M:%S%p)").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("Process {name} crashed: memory access violation at {fault}, ended {ended}.");
            true
        } else {
            false
        }
    };
    if !declined {
        enter(sys, handle);
    }
}

/// The per-process console. Supports `process-smi` for a detail dump and
/// `exit` to return to the root prompt.
pub fn enter(sys: &Arc<System>, handle: ProcessHandle) {
    let name = lock(&handle).name.clone();
    println!();
    print_detail(sys, &handle);

    let stdin = io::stdin();
    loop {
        print!("{name}:\\> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match line.trim() {
            "" => {}
            "exit" => break,
            "process-smi" => print_detail(sys, &handle),
            other => println!("Unknown command: '{other}'. Try 'process-smi' or 'exit'."),
        }
    }
}

fn print_detail(sys: &Arc<System>, handle: &ProcessHandle) {
    let p = lock(handle);
    println!("Process: {}", p.name);
    println!("ID: {}", p.id);
    println!(
        "State: {:?}{}",
        p.state,
        p.faulting_address
            .map(|addr| format!(" (fault at {addr:#06x})"))
            .unwrap_or_default()
    );
    println!(
        "Instruction line: {} / {}",
        p.program_counter.min(p.instructions.len()),
        p.instructions.len()
    );
    println!("Memory: {} bytes", p.memory_required);
    if let Ok(pages) = sys.memory.process_pages(p.id) {
        let rendered: Vec<String> = pages.iter().map(|view| view.label(p.id)).collect();
        println!("Pages: {}", rendered.join(" "));
    }
    if p.logs.is_empty() {
        println!("Logs: (none)");
    } else {
        println!("Logs:");
        for line in &p.logs {
            println!("  {line}");
        }
    }
    println!();
}
