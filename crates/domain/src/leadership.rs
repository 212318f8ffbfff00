/// Phase of the primary-host leadership state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadershipPhase {
    /// Constructed, loop not started yet.
    Idle,
    /// Polling the backend for the lock.
    Acquiring,
    /// Holding the lock and renewing it.
    Leader,
    /// Renewal failed; the lock is no longer held.
    LeaseLost,
    /// Stopped for good.
    Disposed,
}

impl LeadershipPhase {
    /// Returns a stable lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Leader => "leader",
            Self::LeaseLost => "lease_lost",
            Self::Disposed => "disposed",
        }
    }

    /// Returns true when the instance should run singleton work.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Leader)
    }
}

impl std::fmt::Display for LeadershipPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
