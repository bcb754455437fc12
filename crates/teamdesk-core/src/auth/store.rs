//! Session store: the only owner of the persisted session record.
//!
//! Storage is read at `hydrate()` and written on `save()`/`clear()`.
//! Everything else is served from the in-memory copy. When durable storage
//! fails the store keeps working in memory for the rest of the process.

use tracing::{debug, info, warn};

use super::session::{Session, SessionData, SESSION_KEY};
use super::storage::{SessionStorage, StorageError};

pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    session: Session,
    /// Bumped by every save and clear; used to drop stale login results.
    generation: u64,
    persistent: bool,
}

impl SessionStore {
    pub fn new(storage: Box<dyn SessionStorage>) -> Self {
        Self {
            storage,
            session: Session::Unauthenticated,
            generation: 0,
            persistent: true,
        }
    }

    /// Load the session record from storage.
    ///
    /// Never fails: a missing, malformed or unreadable record all yield
    /// `Session::Unauthenticated`.
    pub fn hydrate(&mut self) -> Session {
        self.session = match self.read_record() {
            Ok(Some(data)) => {
                debug!(user_id = %data.profile.user_id, role = %data.profile.role, "Session hydrated");
                Session::Authenticated(data)
            }
            Ok(None) => {
                debug!("No stored session");
                Session::Unauthenticated
            }
            Err(HydrateError::Corrupt(reason)) => {
                warn!(reason = %reason, "Stored session is corrupt, discarding");
                if let Err(e) = self.storage.remove(SESSION_KEY) {
                    warn!(error = %e, "Failed to remove corrupt session record");
                }
                Session::Unauthenticated
            }
            Err(HydrateError::Storage(e)) => {
                self.degrade(&e);
                Session::Unauthenticated
            }
        };
        self.session.clone()
    }

    fn read_record(&self) -> Result<Option<SessionData>, HydrateError> {
        if !self.persistent {
            return Ok(None);
        }
        let Some(contents) = self.storage.read(SESSION_KEY).map_err(HydrateError::Storage)? else {
            return Ok(None);
        };
        let data: SessionData = serde_json::from_str(&contents)
            .map_err(|e| HydrateError::Corrupt(e.to_string()))?;
        if !data.is_well_formed() {
            return Err(HydrateError::Corrupt("empty token or user id".to_string()));
        }
        Ok(Some(data))
    }

    /// Persist an authenticated session and make it current.
    pub fn save(&mut self, data: SessionData) {
        if self.persistent {
            let result = serde_json::to_string(&data)
                .map_err(|e| StorageError::Unavailable(e.to_string()))
                .and_then(|contents| self.storage.write(SESSION_KEY, &contents));
            match result {
                Ok(()) => debug!(backend = self.storage.kind(), "Session saved"),
                Err(e) => {
                    self.degrade(&e);
                    // An older record would otherwise come back on reload
                    self.remove_record();
                }
            }
        }
        self.session = Session::Authenticated(data);
        self.generation += 1;
    }

    /// Save only if nothing was saved or cleared since `generation` was read.
    /// Returns false (and leaves the store untouched) for stale writes.
    pub fn save_if_current(&mut self, generation: u64, data: SessionData) -> bool {
        if generation != self.generation {
            info!(
                expected = generation,
                actual = self.generation,
                "Discarding stale session write"
            );
            return false;
        }
        self.save(data);
        true
    }

    /// Forget the session in memory and in storage. Idempotent.
    ///
    /// Removal is attempted even when memory-only, since a record written
    /// before storage started failing may still be there.
    pub fn clear(&mut self) {
        self.remove_record();
        self.session = Session::Unauthenticated;
        self.generation += 1;
    }

    /// In-memory session; never touches storage.
    pub fn current(&self) -> &Session {
        &self.session
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once storage has failed and the store is memory-only.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn remove_record(&mut self) {
        if let Err(e) = self.storage.remove(SESSION_KEY) {
            if self.persistent {
                self.degrade(&e);
            } else {
                debug!(error = %e, "Could not remove session record");
            }
        }
    }

    fn degrade(&mut self, e: &StorageError) {
        if self.persistent {
            warn!(
                backend = self.storage.kind(),
                error = %e,
                "Session storage unavailable, keeping session in memory only"
            );
        }
        self.persistent = false;
    }
}

enum HydrateError {
    Corrupt(String),
    Storage(StorageError),
}
