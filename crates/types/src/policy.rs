use std::fmt;

/// Runtime-selected scheduling discipline.
///
/// Two predicates derive from the variant: `uses_quantum` (round-robin only)
/// and `is_preemptive` (SRTF and preemptive priority). Everything else the
/// scheduler needs is the selection key, which lives with the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    Fcfs,
    Sjf,
    Srtf,
    PriorityNonpreemptive,
    PriorityPreemptive,
    Rr,
}

impl SchedulerPolicy {
    /// Parse the config-file spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fcfs" => Some(Self::Fcfs),
            "sjf" => Some(Self::Sjf),
            "srtf" => Some(Self::Srtf),
            "priority_np" => Some(Self::PriorityNonpreemptive),
            "priority_p" => Some(Self::PriorityPreemptive),
            "rr" => Some(Self::Rr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fcfs => "fcfs",
            Self::Sjf => "sjf",
            Self::Srtf => "srtf",
            Self::PriorityNonpreemptive => "priority_np",
            Self::PriorityPreemptive => "priority_p",
            Self::Rr => "rr",
        }
    }

    /// Only round-robin bounds a turn by instruction count.
    pub fn uses_quantum(self) -> bool {
        matches!(self, Self::Rr)
    }

    /// Whether a strictly better ready process evicts the running one.
    pub fn is_preemptive(self) -> bool {
        matches!(self, Self::Srtf | Self::PriorityPreemptive)
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
