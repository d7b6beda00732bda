use rand::Rng;

use types::{Instruction, Limits, Opcode};

/// Bounds for random program synthesis, taken from the runtime config.
#[derive(Debug, Clone, Copy)]
pub struct SynthParams {
    pub min_ins: usize,
    pub max_ins: usize,
    pub max_for_depth: usize,
    pub min_mem_per_proc: usize,
    pub max_mem_per_proc: usize,
}

/// Pick a power-of-two memory size within the configured bounds, clamped to
/// the architectural range.
pub fn random_memory_size(rng: &mut impl Rng, params: &SynthParams) -> usize {
    let lo = params
        .min_mem_per_proc
        .clamp(Limits::MIN_PROC_MEMORY, Limits::MAX_PROC_MEMORY)
        .next_power_of_two();
    let hi = params
        .max_mem_per_proc
        .clamp(lo, Limits::MAX_PROC_MEMORY);
    let lo_exp = lo.trailing_zeros();
    let hi_exp = hi.ilog2();
    1usize << rng.gen_range(lo_exp..=hi_exp)
}

/// Synthesize a random program in the toy language.
///
/// The shape mirrors what the batch generator hands out: the program always
/// opens with a DECLARE so later arithmetic has something to chew on, uses
/// declared variables before undeclared ones, and sprinkles bounded FOR
/// blocks whose bodies never nest past the cap.
pub fn random_program(rng: &mut impl Rng, proc_name: &str, params: &SynthParams) -> Vec<Instruction> {
    let target = rng.gen_range(params.min_ins..=params.max_ins.max(params.min_ins));
    let mut vars: Vec<String> = Vec::new();
    let mut program = Vec::new();

    program.push(declare_new(rng, &mut vars));

    while program.len() < target {
        if rng.gen_ratio(1, 6) && params.max_for_depth > 0 {
            program.push(random_for(rng, proc_name, &mut vars, params, 0));
        } else {
            program.push(random_plain(rng, proc_name, &mut vars));
        }
    }
    program.truncate(target.max(1));
    program
}

fn declare_new(rng: &mut impl Rng, vars: &mut Vec<String>) -> Instruction {
    let name = loop {
        let candidate = format!("v{}", rng.gen_range(0..1000));
        if !vars.contains(&candidate) {
            break candidate;
        }
    };
    let value = rng.gen_range(0..100u16);
    vars.push(name.clone());
    Instruction::new(Opcode::Declare, vec![name, value.to_string()])
}

fn pick_var(rng: &mut impl Rng, vars: &[String]) -> String {
    vars[rng.gen_range(0..vars.len())].clone()
}

/// One non-FOR instruction, biased toward using already-declared variables.
fn random_plain(rng: &mut impl Rng, proc_name: &str, vars: &mut Vec<String>) -> Instruction {
    match rng.gen_range(0..5) {
        0 => declare_new(rng, vars),
        1 | 2 => {
            if vars.is_empty() {
                return declare_new(rng, vars);
            }
            let opcode = if rng.gen_bool(0.5) { Opcode::Add } else { Opcode::Subtract };
            let dest = pick_var(rng, vars);
            let lhs = pick_var(rng, vars);
            let rhs = if rng.gen_bool(0.5) {
                pick_var(rng, vars)
            } else {
                rng.gen_range(0..100u16).to_string()
            };
            Instruction::new(opcode, vec![dest, lhs, rhs])
        }
        3 => {
            if vars.is_empty() {
                return declare_new(rng, vars);
            }
            let var = pick_var(rng, vars);
            Instruction::new(Opcode::Print, vec![format!("\"Value of {var}: \""), var])
        }
        _ => {
            if rng.gen_bool(0.5) {
                Instruction::new(Opcode::Sleep, vec![rng.gen_range(1..=10u16).to_string()])
            } else {
                Instruction::new(
                    Opcode::Print,
                    vec![format!("\"Hello world from {proc_name}\"")],
                )
            }
        }
    }
}

/// A FOR at nesting level `depth` (0 for a top-level FOR). Bodies may carry
/// further FORs until the next level would cross `max_for_depth`.
fn random_for(
    rng: &mut impl Rng,
    proc_name: &str,
    vars: &mut Vec<String>,
    params: &SynthParams,
    depth: usize,
) -> Instruction {
    let repeats = rng.gen_range(2..=5u32);
    let body_len = rng.gen_range(1..=3usize);
    let body: Vec<Instruction> = (0..body_len)
        .map(|_| {
            if depth + 1 < params.max_for_depth && rng.gen_ratio(1, 3) {
                random_for(rng, proc_name, vars, params, depth + 1)
            } else {
                random_plain(rng, proc_name, vars)
            }
        })
        .collect();
    Instruction::with_body(Opcode::For, vec![repeats.to_string()], body)
}
