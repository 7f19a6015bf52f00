use crate::error::Result;

/// Contract of the external coordination service used by [`ReplicatedLog`].
///
/// The service stores the authoritative list of ledgers making up the
/// journal and arbitrates leader election (one ephemeral leader node per
/// cluster). Session expiry must surface as a `SessionExpired` event so the
/// local broker steps down.
///
/// [`ReplicatedLog`]: crate::log::ReplicatedLog
pub trait ClusterCoordinator: Send + Sync {
    /// Ledger ids that currently make up the journal, oldest first.
    fn ledgers_list(&self) -> Result<Vec<u64>>;

    /// Persist the ledger list. Leader-only.
    fn save_ledgers_list(&self, ids: &[u64]) -> Result<()>;

    /// Try to become the leader. The outcome is delivered asynchronously as
    /// election events; callers observe it through `is_leader`.
    fn request_leadership(&self) -> Result<()>;

    fn is_leader(&self) -> bool;

    fn close(&self);
}

/// Where this replica stands in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Not the leader; another replica may be.
    NotElected,
    /// This replica holds the leader node.
    Elected,
    /// Election in flight: the leader node was observed missing and a new
    /// attempt is running.
    Running,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::NotElected => write!(f, "not_elected"),
            ElectionState::Elected => write!(f, "elected"),
            ElectionState::Running => write!(f, "running"),
        }
    }
}

/// Events delivered by the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionEvent {
    /// Our attempt to create the leader node succeeded.
    LeaderNodeCreated,
    /// The leader node is held by another replica.
    LeaderNodeExists,
    /// The current leader's node disappeared.
    LeaderNodeDeleted,
    /// The request outcome is unknown; the leader node must be re-checked.
    ConnectionLost,
    /// Our session is gone; any leadership held is void.
    SessionExpired,
}

/// What the coordinator implementation must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionAction {
    /// Tell the listener leadership was acquired.
    NotifyAcquired,
    /// Tell the listener leadership was lost.
    NotifyLost,
    /// Create the leader node again.
    RetryElection,
    /// Watch the existing leader node for deletion.
    WatchLeader,
    /// Re-read the leader node to resolve an unknown outcome.
    CheckLeader,
}

/// Deterministic election protocol, factored out of the coordination client.
///
/// Handlers are idempotent: re-delivering an event in the same state yields
/// no duplicate notification, so the transport may retry freely.
#[derive(Debug)]
pub struct ElectionStateMachine {
    state: ElectionState,
}

impl ElectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ElectionState::NotElected,
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn is_leader(&self) -> bool {
        self.state == ElectionState::Elected
    }

    pub fn handle(&mut self, event: ElectionEvent) -> Vec<ElectionAction> {
        let before = self.state;
        let actions = match event {
            ElectionEvent::LeaderNodeCreated => {
                if self.state == ElectionState::Elected {
                    Vec::new()
                } else {
                    self.state = ElectionState::Elected;
                    vec![ElectionAction::NotifyAcquired]
                }
            }
            ElectionEvent::LeaderNodeExists => {
                self.state = ElectionState::NotElected;
                vec![ElectionAction::WatchLeader]
            }
            ElectionEvent::LeaderNodeDeleted => {
                if self.state == ElectionState::Elected {
                    // Our own node vanished underneath us: step down first.
                    self.state = ElectionState::Running;
                    vec![ElectionAction::NotifyLost, ElectionAction::RetryElection]
                } else {
                    self.state = ElectionState::Running;
                    vec![ElectionAction::RetryElection]
                }
            }
            ElectionEvent::ConnectionLost => vec![ElectionAction::CheckLeader],
            ElectionEvent::SessionExpired => {
                if self.state == ElectionState::Elected {
                    self.state = ElectionState::NotElected;
                    vec![ElectionAction::NotifyLost]
                } else {
                    self.state = ElectionState::NotElected;
                    Vec::new()
                }
            }
        };
        if before != self.state {
            tracing::info!(from = %before, to = %self.state, event = ?event, "election transition");
        }
        actions
    }
}

impl Default for ElectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
