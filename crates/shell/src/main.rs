use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use kernel::{Config, System};

mod commands;
mod view;

/// Interactive shell for the process emulator.
#[derive(Debug, Parser)]
#[command(name = "shell", about = "multi-core process and memory emulator")]
struct Args {
    /// Path to the configuration file read by `initialize`.
    #[arg(long, default_value = "config.txt")]
    config: PathBuf,
}

const BANNER: &str = r"
-------------------------------------------------
  _____  _____  ___________ _____ _______   __
 /  __ \/  ___||  _  | ___ \  ___/  ___\ \ / /
 | /  \/\ `--. | | | | |_/ / |__ \ `--. \ V /
 | |     `--. \| | | |  __/|  __| `--. \ \ /
 | \__/\/\__/ /\ \_/ / |   | |___/\__/ / | |
  \____/\____/  \___/\_|   \____/\____/  \_/
-------------------------------------------------
";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    clear_console();
    print_banner();

    let stdin = io::stdin();
    let mut system: Option<Arc<System>> = None;

    loop {
        print!("root:\\> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("reading stdin")? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "exit" => break,
            "clear" => {
                clear_console();
                print_banner();
                continue;
            }
            _ => {}
        }

        match system.clone() {
            None => {
                if line == "initialize" {
                    match initialize(&args) {
                        Ok(sys) => {
                            println!(
                                "System initialized successfully from {}.",
                                args.config.display()
                            );
                            system = Some(sys);
                        }
                        Err(err) => eprintln!("Initialization failed: {err:#}"),
                    }
                } else {
                    eprintln!("Error: system not initialized. Run 'initialize' first.");
                }
            }
            Some(sys) => {
                if line == "initialize" {
                    println!("System is already initialized.");
                } else {
                    commands::dispatch(&sys, line);
                }
            }
        }
    }

    if let Some(sys) = system {
        println!("\nShutdown initiated. Waiting for threads to complete...");
        sys.shutdown();
        println!("Shutdown complete. Goodbye!");
    }
    Ok(())
}

fn initialize(args: &Args) -> Result<Arc<System>> {
    let config = Config::load(&args.config)?;
    System::start(config)
}

fn print_banner() {
    println!("{BANNER}");
    println!("Type 'initialize' to begin or 'exit' to quit.\n");
}

fn clear_console() {
    // ANSI clear + home; falls back to scrolling on dumb terminals.
    print!("\x1B[2J\x1B[1;1H");
    io::stdout().flush().ok();
}
