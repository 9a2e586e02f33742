//! In-memory session store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use cloud_session_core::{Clock, SessionData, SessionId, SessionRecord, SystemClock};

use super::snapshot::{RecoverySnapshot, SnapshotError};

struct Inner {
    records: RwLock<HashMap<SessionId, SessionRecord>>,
    clock: Arc<dyn Clock>,
    snapshot: Option<RecoverySnapshot>,
    // Id currently held by the snapshot file.
    snapshot_id: Mutex<Option<SessionId>>,
}

/// Process-local map from session id to record.
///
/// Cheap to clone; clones share the same map. Every operation holds the
/// lock for a short synchronous section only, never across an `.await`.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create an empty store on the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, None)
    }

    /// Create an empty store that mirrors the last touched session to
    /// `snapshot`.
    #[must_use]
    pub fn with_snapshot(clock: Arc<dyn Clock>, snapshot: RecoverySnapshot) -> Self {
        Self::build(clock, Some(snapshot))
    }

    fn build(clock: Arc<dyn Clock>, snapshot: Option<RecoverySnapshot>) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(HashMap::new()),
                clock,
                snapshot,
                snapshot_id: Mutex::new(None),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, SessionRecord>> {
        self.inner
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, SessionRecord>> {
        self.inner
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Create an empty record for `id` if there is none.
    ///
    /// Returns `true` if a record was created.
    pub fn ensure(&self, id: &SessionId) -> bool {
        let now = self.now();
        let mut records = self.write();
        if records.contains_key(id) {
            return false;
        }
        records.insert(id.clone(), SessionRecord::new(now));
        true
    }

    /// Copy of the record for `id`.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionRecord> {
        self.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.read().contains_key(id)
    }

    /// Refresh `lastTouched`. Returns `false` if there is no such record.
    pub fn touch(&self, id: &SessionId) -> bool {
        let now = self.now();
        self.write()
            .get_mut(id)
            .map(|record| record.last_touched = now)
            .is_some()
    }

    /// Remove the record. Returns `true` if one existed.
    pub fn delete(&self, id: &SessionId) -> bool {
        self.take(id).is_some()
    }

    /// Remove the record and hand it back, in one critical section.
    pub fn take(&self, id: &SessionId) -> Option<SessionRecord> {
        self.write().remove(id)
    }

    /// Put `record` under `id`, replacing any existing one.
    pub fn insert(&self, id: SessionId, record: SessionRecord) {
        self.write().insert(id, record);
    }

    /// Replace the payload, creating the record if needed.
    pub fn replace_data(&self, id: &SessionId, data: SessionData) {
        let now = self.now();
        self.write()
            .entry(id.clone())
            .or_insert_with(|| SessionRecord::new(now))
            .data = data;
    }

    /// Run `f` against the resident payload. `None` if there is no record.
    pub fn with_data_mut<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut SessionData) -> R,
    ) -> Option<R> {
        self.write().get_mut(id).map(|record| f(&mut record.data))
    }

    /// Run `f` against the payload, creating an empty record first if needed.
    pub fn upsert_data<R>(&self, id: &SessionId, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let now = self.now();
        let mut records = self.write();
        let record = records
            .entry(id.clone())
            .or_insert_with(|| SessionRecord::new(now));
        f(&mut record.data)
    }

    /// Remove every record idle for longer than `expiry_secs` as of `now`.
    ///
    /// Returns the removed ids. Also removes the recovery file if it held
    /// one of them.
    pub fn sweep(&self, now: i64, expiry_secs: u64) -> Vec<SessionId> {
        let removed: Vec<SessionId> = {
            let mut records = self.write();
            let expired: Vec<SessionId> = records
                .iter()
                .filter(|(_, record)| record.is_expired(now, expiry_secs))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                records.remove(id);
            }
            expired
        };

        for id in &removed {
            tracing::debug!(session_id = %id, "Expired session removed");
        }
        self.forget_snapshot_if(|held| removed.contains(held));
        removed
    }

    /// Sweep as of the store's clock.
    pub fn sweep_now(&self, expiry_secs: u64) -> Vec<SessionId> {
        self.sweep(self.now(), expiry_secs)
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.write().clear();
        self.forget_snapshot_if(|_| true);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether a recovery snapshot is attached.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.inner.snapshot.is_some()
    }

    /// Payload the recovery file holds for `id`.
    ///
    /// A file holding another session, an absent file and a corrupt file
    /// all read as a miss.
    #[must_use]
    pub fn recover(&self, id: &SessionId) -> Option<SessionData> {
        let snapshot = self.inner.snapshot.as_ref()?;
        match snapshot.read() {
            Ok(entry) => entry
                .filter(|entry| entry.id == *id)
                .map(|entry| entry.record.data),
            Err(e) => {
                tracing::warn!(path = %snapshot.path().display(), "Ignoring recovery snapshot: {e}");
                None
            }
        }
    }

    /// Write the current record for `id` to the recovery file.
    ///
    /// A store without a snapshot, or an unknown id, is a no-op.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn persist(&self, id: &SessionId) -> Result<(), SnapshotError> {
        let Some(snapshot) = self.inner.snapshot.as_ref() else {
            return Ok(());
        };
        let Some(record) = self.get(id) else {
            return Ok(());
        };
        snapshot.write(id, &record)?;
        *self
            .inner
            .snapshot_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        Ok(())
    }

    fn forget_snapshot_if(&self, held_by: impl Fn(&SessionId) -> bool) {
        let Some(snapshot) = self.inner.snapshot.as_ref() else {
            return;
        };
        let mut held = self
            .inner
            .snapshot_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if held.as_ref().is_some_and(|id| held_by(id)) {
            if let Err(e) = snapshot.remove() {
                tracing::error!(path = %snapshot.path().display(), "Failed to remove recovery snapshot: {e}");
            }
            *held = None;
        }
    }
}
