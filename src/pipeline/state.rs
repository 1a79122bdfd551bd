use serde::{Deserialize, Serialize};
use crate::errors::ScanlineError;

/// Lifecycle of a scan job.
///
/// Forward order is `Pending → Scanning → Inspecting → Reconciled → Notified`.
/// `DeadLettered` is reachable from `Scanning` or `Inspecting`; `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Scanning,
    Inspecting,
    Reconciled,
    Notified,
    DeadLettered,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Scanning,
        JobState::Inspecting,
        JobState::Reconciled,
        JobState::Notified,
        JobState::DeadLettered,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scanning => "scanning",
            Self::Inspecting => "inspecting",
            Self::Reconciled => "reconciled",
            Self::Notified => "notified",
            Self::DeadLettered => "dead_lettered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.as_str() == s)
    }

    /// Position on the forward path; terminal error states sit outside it.
    fn stage_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Scanning => Some(1),
            Self::Inspecting => Some(2),
            Self::Reconciled => Some(3),
            Self::Notified => Some(4),
            Self::DeadLettered | Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Notified | Self::DeadLettered | Self::Failed)
    }

    /// Pending, Scanning and Inspecting count as an outstanding pipeline run.
    /// A Reconciled job has finished its scanner work.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Scanning | Self::Inspecting)
    }

    /// Whether `self → next` respects monotonic forward progress.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::DeadLettered => matches!(self, Self::Scanning | Self::Inspecting),
            Self::Failed => true,
            _ => match (self.stage_rank(), next.stage_rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    pub fn check_transition(&self, next: JobState) -> Result<(), ScanlineError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ScanlineError::InvalidTransition(format!("{} -> {}", self, next)))
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    #[serde(rename = "registry.push")]
    RegistryPush,
    #[serde(rename = "schedule.rescan")]
    ScheduledRescan,
    #[serde(rename = "manual.replay")]
    ManualReplay,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistryPush => "registry.push",
            Self::ScheduledRescan => "schedule.rescan",
            Self::ManualReplay => "manual.replay",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
