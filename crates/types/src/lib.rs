pub mod clock;
pub use clock::{local_timestamp, Clock};

pub mod limits;
pub use limits::Limits;

pub mod instruction;
pub use instruction::{Instruction, Opcode};

pub mod process;
pub use process::{ContextStack, ForContext, Pid, Process, ProcessHandle, ProcessState};

pub mod policy;
pub use policy::SchedulerPolicy;

pub mod error;
pub use error::MemError;
