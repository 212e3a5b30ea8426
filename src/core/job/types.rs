use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Created,
    Initializing,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Initializing => "initializing",
            JobState::Running => "running",
            JobState::Terminating => "terminating",
            JobState::Terminated => "terminated",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Terminated | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn can_transition(from: JobState, to: JobState) -> bool {
    if from == to {
        return true;
    }
    match from {
        JobState::Created => matches!(to, JobState::Initializing | JobState::Terminating),
        JobState::Initializing => matches!(
            to,
            JobState::Running | JobState::Failed | JobState::Terminating
        ),
        JobState::Running => matches!(to, JobState::Terminating),
        JobState::Terminating => matches!(to, JobState::Terminated),
        JobState::Terminated | JobState::Failed => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

/// Sent to the manager's coordinator once a top-level job is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: String,
    pub outcome: JobOutcome,
}
