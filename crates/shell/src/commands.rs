use std::fs;
use std::sync::Arc;

use kernel::{process_smi, system_report, vmstat, System};
use vm::parse_program;

use crate::view;

const REPORT_FILE: &str = "emu-report.txt";

/// Dispatch one root-prompt command against the running system.
pub fn dispatch(sys: &Arc<System>, line: &str) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["scheduler-start"] => {
            if sys.start_generator() {
                println!("Process generator has been started.");
            } else {
                println!("Generator is already running.");
            }
        }
        ["scheduler-stop"] => {
            if sys.stop_generator() {
                println!("Process generator has been stopped.");
            } else {
                println!("Generator is not currently running.");
            }
        }
        ["screen", "-ls"] => print!("{}", system_report(sys)),
        ["screen", "-s", name, mem] => screen_create(sys, name, mem, None),
        ["screen", "-c", name, mem, ..] => match inline_program(line) {
            Some(src) => screen_create(sys, name, mem, Some(&src)),
            None => eprintln!("screen -c requires a double-quoted instruction list."),
        },
        ["screen", "-r", name] => view::resume(sys, name),
        ["process-smi"] => print!("{}", process_smi(sys)),
        ["vmstat"] => print!("{}", vmstat(sys)),
        ["report-util"] => match fs::write(REPORT_FILE, system_report(sys)) {
            Ok(()) => println!("Report generated at ./{REPORT_FILE}"),
            Err(err) => eprintln!("Error: could not write {REPORT_FILE}: {err}"),
        },
        _ => println!("Unknown command: '{line}'"),
    }
}

fn screen_create(sys: &Arc<System>, name: &str, mem: &str, program_src: Option<&str>) {
    let Ok(memory_bytes) = mem.parse::<usize>() else {
        eprintln!("Invalid memory size '{mem}'.");
        return;
    };
    let program = match program_src {
        None => None,
        Some(src) => match parse_program(src, sys.config.max_for_depth) {
            Ok(program) => Some(program),
            Err(err) => {
                eprintln!("Could not parse instructions: {err}.");
                return;
            }
        },
    };
    let entered_view = program_src.is_none();
    match sys.create_interactive(name, memory_bytes, program) {
        Ok(handle) => {
            if entered_view {
                view::enter(sys, handle);
            } else {
                let name = view::lock(&handle).name.clone();
                println!("Process {name} created.");
            }
        }
        Err(err) => eprintln!("Error: {err}."),
    }
}

/// The instruction string of `screen -c`: everything between the first and
/// last double quote on the line.
fn inline_program(line: &str) -> Option<String> {
    let first = line.find('"')?;
    let last = line.rfind('"')?;
    if last <= first {
        return None;
    }
    Some(line[first + 1..last].to_string())
}
