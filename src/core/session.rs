//! Per-client session registry.
//!
//! Maps a client identity to at most one live upstream session. All
//! check-then-act operations go through the `DashMap` entry API so that
//! concurrent starts for the same identity cannot both win.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::realtime::{
    AudioQueue, DEFAULT_AUDIO_QUEUE_CAPACITY, OverflowPolicy, SessionOutcome, SessionState,
};

/// Handles returned to the caller that won the start for an identity.
#[derive(Debug, Clone)]
pub struct SessionLease {
    pub session_id: Uuid,
    pub token: CancellationToken,
    pub queue: Arc<AudioQueue>,
    pub state: Arc<RwLock<SessionState>>,
}

/// A session removed by [`SessionRegistry::stop`].
#[derive(Debug)]
pub struct StoppedSession {
    pub session_id: Uuid,
    /// Controller task, if one was attached
    pub task: Option<JoinHandle<SessionOutcome>>,
}

struct SessionEntry {
    session_id: Uuid,
    token: CancellationToken,
    queue: Arc<AudioQueue>,
    state: Arc<RwLock<SessionState>>,
    task: Option<JoinHandle<SessionOutcome>>,
}

/// Registry of live sessions keyed by client identity.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    root: CancellationToken,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_QUEUE_CAPACITY, OverflowPolicy::default())
    }
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            root: CancellationToken::new(),
            queue_capacity,
            overflow_policy,
        }
    }

    /// Register a new session for `identity`.
    ///
    /// Returns `None` if one is already registered; the existing session is
    /// left untouched.
    pub fn start(&self, identity: &str) -> Option<SessionLease> {
        match self.sessions.entry(identity.to_string()) {
            Entry::Occupied(_) => {
                debug!(identity = %identity, "Session already active, ignoring start");
                None
            }
            Entry::Vacant(vacant) => {
                let lease = SessionLease {
                    session_id: Uuid::new_v4(),
                    token: self.root.child_token(),
                    queue: Arc::new(AudioQueue::new(self.queue_capacity, self.overflow_policy)),
                    state: Arc::new(RwLock::new(SessionState::Idle)),
                };
                vacant.insert(SessionEntry {
                    session_id: lease.session_id,
                    token: lease.token.clone(),
                    queue: lease.queue.clone(),
                    state: lease.state.clone(),
                    task: None,
                });
                info!(identity = %identity, session_id = %lease.session_id, "Session registered");
                Some(lease)
            }
        }
    }

    /// Attach the controller task to a registered session.
    ///
    /// Returns `false` if the session was stopped in the meantime. The handle
    /// is dropped and the task winds down on its cancelled token.
    pub fn attach_task(
        &self,
        identity: &str,
        session_id: Uuid,
        handle: JoinHandle<SessionOutcome>,
    ) -> bool {
        match self.sessions.get_mut(identity) {
            Some(mut entry) if entry.session_id == session_id => {
                entry.task = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Queue one audio fragment for the identity's session.
    ///
    /// Returns `false` when no session is registered, the fragment is dropped.
    pub fn enqueue_audio(&self, identity: &str, fragment: String) -> bool {
        let Some(queue) = self.sessions.get(identity).map(|entry| entry.queue.clone()) else {
            return false;
        };
        queue.push(fragment);
        true
    }

    /// Remove and cancel the identity's session.
    ///
    /// The returned session carries the controller task so the caller can
    /// await teardown. A second call finds nothing and returns `None`.
    pub fn stop(&self, identity: &str) -> Option<StoppedSession> {
        let (_, entry) = self.sessions.remove(identity)?;
        entry.token.cancel();
        info!(identity = %identity, session_id = %entry.session_id, "Session stopped");
        Some(StoppedSession {
            session_id: entry.session_id,
            task: entry.task,
        })
    }

    /// Remove the session only if it is still `session_id`.
    ///
    /// Called by a controller task that ended on its own. Returns `true` if
    /// this call removed the entry, `false` if it was already stopped or
    /// replaced.
    pub fn release(&self, identity: &str, session_id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(identity, |_, entry| entry.session_id == session_id);
        if let Some((_, entry)) = &removed {
            entry.token.cancel();
            debug!(identity = %identity, session_id = %session_id, "Session released");
        }
        removed.is_some()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Lifecycle state of the identity's session.
    pub fn state(&self, identity: &str) -> Option<SessionState> {
        self.sessions.get(identity).map(|entry| *entry.state.read())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancel every session, current and future.
    pub fn shutdown(&self) {
        info!(sessions = self.sessions.len(), "Cancelling all sessions");
        self.root.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }
}
