pub mod interpreter;
pub use interpreter::{Interpreter, Step};

pub mod parser;
pub use parser::{parse_program, ParseError};

pub mod symbols;

pub mod synth;
pub use synth::{random_memory_size, random_program, SynthParams};
