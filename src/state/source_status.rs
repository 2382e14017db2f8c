/// Source status and session end reasons
///
/// These are the observable states a source moves through and the reasons a
/// crawl session can end with.
use std::fmt;

/// Observable status of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceStatus {
    /// No recorded session
    Idle,

    /// A session is active
    Running,

    // ===== Terminal Session States =====
    /// Last session exhausted its items or reached max hits
    Completed,

    /// Last session was paused by an operator
    Paused,

    /// Last session was stopped by the blocking detector
    Blocked,

    /// Last session hit the consecutive failure ceiling
    Failed,
}

impl SourceStatus {
    /// Returns true if a session is active
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if `resume` is allowed from this status
    ///
    /// A blocked source stays blocked until an operator resumes it, so both
    /// paused and blocked sources are resumable.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Blocked)
    }

    /// Returns true if the state machine allows moving to `to`
    ///
    /// Every non-running status may move to running. A running session may
    /// only end in one of the four terminal statuses.
    pub fn can_transition_to(&self, to: SourceStatus) -> bool {
        match (self, to) {
            (Self::Running, Self::Completed | Self::Paused | Self::Blocked | Self::Failed) => true,
            (Self::Running, _) => false,
            (_, Self::Running) => true,
            _ => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "paused" => Some(Self::Paused),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Why a crawl session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    Exhausted,
    MaxHitsReached,
    PausedByOperator,
    Blocked,
    Failed,
}

impl EndReason {
    /// Status the source lands in after a session ends for this reason
    pub fn status(&self) -> SourceStatus {
        match self {
            Self::Exhausted | Self::MaxHitsReached => SourceStatus::Completed,
            Self::PausedByOperator => SourceStatus::Paused,
            Self::Blocked => SourceStatus::Blocked,
            Self::Failed => SourceStatus::Failed,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::MaxHitsReached => "max_hits_reached",
            Self::PausedByOperator => "paused_by_operator",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "exhausted" => Some(Self::Exhausted),
            "max_hits_reached" => Some(Self::MaxHitsReached),
            "paused_by_operator" => Some(Self::PausedByOperator),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
