//! Process-wide map of live sessions.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::Session;
use crate::{AppError, Result};

/// Id → live session map.
///
/// The lock is held only for the duration of a single check-and-mutate
/// operation and never across an `.await`.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `session` under its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateSession` if the id is already present.
    /// The existing entry is left untouched.
    pub fn put(&self, session: Arc<Session>) -> Result<()> {
        match self.lock().entry(session.id().to_owned()) {
            Entry::Occupied(entry) => Err(AppError::DuplicateSession(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    /// Remove a session; removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().remove(id)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of all live sessions, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Copy of every live session taken under the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().values().cloned().collect()
    }

    /// Visit every session in a snapshot.
    ///
    /// `f` runs without the lock held, so it may call [`SessionTable::remove`].
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Ids of sessions whose last activity is older than `cutoff`.
    #[must_use]
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.lock()
            .values()
            .filter(|session| session.last_activity() < cutoff)
            .map(|session| session.id().to_owned())
            .collect()
    }
}
