//! Local revision counter used to recognise our own pushes coming back.

use todosync_proto::task::{RemoteRecord, SessionId};

/// How an inbound record relates to this session's pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Written by another session.
    Foreign,
    /// One of our pushes that the board already reflects, or one that a
    /// later push of ours supersedes.
    Echo,
    /// Our latest push, arriving after a foreign record was applied. The
    /// backend ends on this record, so it must be adopted again.
    OwnLatest,
}

/// Tracks the local revision, the last revision pushed upstream and whether
/// a foreign record has been applied since that push.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RevisionTracker {
    current: u64,
    last_pushed: Option<u64>,
    foreign_since_push: bool,
}

impl RevisionTracker {
    /// Starts at revision zero with nothing pushed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: 0,
            last_pushed: None,
            foreign_since_push: false,
        }
    }

    /// Advances to the next revision after a local change and returns it.
    pub const fn bump(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// The current local revision.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.current
    }

    /// The most recently pushed revision, if any.
    #[must_use]
    pub const fn last_pushed(&self) -> Option<u64> {
        self.last_pushed
    }

    /// Records that `revision` is being pushed.
    pub fn mark_pushed(&mut self, revision: u64) {
        self.last_pushed = Some(self.last_pushed.map_or(revision, |prev| prev.max(revision)));
        self.foreign_since_push = false;
    }

    /// Records that a record from another session replaced the board.
    pub const fn mark_foreign_applied(&mut self) {
        self.foreign_since_push = true;
    }

    /// Records that the board again matches our last push.
    pub const fn mark_in_step(&mut self) {
        self.foreign_since_push = false;
    }

    /// Classifies `record` relative to this session's pushes.
    ///
    /// Records arrive in the order the backend stored them, so when a
    /// foreign record has been applied after our last push went out, the
    /// echo of that push is the newer of the two.
    #[must_use]
    pub fn classify(&self, record: &RemoteRecord, session: &SessionId) -> Inbound {
        let Some(pushed) = self.last_pushed else {
            return Inbound::Foreign;
        };
        if !record.is_from(session) || record.revision > pushed {
            return Inbound::Foreign;
        }
        if record.revision == pushed && self.foreign_since_push {
            Inbound::OwnLatest
        } else {
            Inbound::Echo
        }
    }

    /// Returns `true` if `record` is one of this session's own pushes that
    /// can be skipped.
    #[must_use]
    pub fn is_echo(&self, record: &RemoteRecord, session: &SessionId) -> bool {
        self.classify(record, session) == Inbound::Echo
    }
}
