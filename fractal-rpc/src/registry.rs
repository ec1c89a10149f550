//! The server-side table of live objects. Every `RemoteDataSet` on a
//! client corresponds to one entry here, keyed by the `ObjectId` handed
//! back when it was created. `insert` seeds a count of one, `retain`
//! bumps it, `prune` decrements and evicts at zero.
//!
//! Also carries the session bookkeeping the object-manager contract
//! (section 4.7) asks for: `add_session`/`remove_session`/
//! `get_subscription`, keyed by [`SessionId`] rather than by `ObjectId`,
//! so the at-most-one-in-flight rule tracks a client, not a target.

use std::sync::Arc;

use dashmap::DashMap;
use fractal_core::{DataSetHandle, DatasetError, ElementType, ObjectId};
use fractal_stream::Subscription;
use tracing::{debug, info};

use crate::session::SessionId;

struct Entry<T> {
    handle: DataSetHandle<T>,
    refcount: usize,
}

pub struct ObjectRegistry<T> {
    objects: DashMap<ObjectId, Entry<T>>,
    sessions: DashMap<SessionId, Option<Subscription>>,
}

impl<T: ElementType> ObjectRegistry<T> {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Reserve `session` for a new in-flight operation. Fails with
    /// `SessionBusy` if the session already has one running.
    pub fn add_session(&self, session: SessionId) -> Result<(), DatasetError> {
        match self.sessions.entry(session) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DatasetError::SessionBusy(format!(
                "session {session} already has an operation in flight"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(None);
                debug!(%session, "session reserved");
                Ok(())
            }
        }
    }

    /// Record the subscription backing the session's in-flight operation,
    /// once one exists, so a concurrent disposal request can find it.
    pub fn attach_subscription(&self, session: SessionId, subscription: Subscription) {
        if let Some(mut slot) = self.sessions.get_mut(&session) {
            *slot = Some(subscription);
        }
    }

    pub fn get_subscription(&self, session: SessionId) -> Option<Subscription> {
        self.sessions.get(&session).and_then(|s| s.clone())
    }

    /// Release `session`, disposing its subscription if one is still
    /// live. Idempotent: removing a session with no reservation is a
    /// no-op.
    pub fn remove_session(&self, session: SessionId) {
        if let Some((_, subscription)) = self.sessions.remove(&session) {
            if let Some(subscription) = subscription {
                subscription.dispose();
            }
            debug!(%session, "session released");
        }
    }

    pub fn insert(&self, handle: DataSetHandle<T>) -> ObjectId {
        let id = ObjectId::new_random();
        info!(object = %id, "registered object");
        self.objects.insert(id, Entry { handle, refcount: 1 });
        id
    }

    pub fn lookup(&self, id: ObjectId) -> Result<DataSetHandle<T>, DatasetError> {
        self.objects
            .get(&id)
            .map(|e| e.handle.clone())
            .ok_or(DatasetError::ObjectNotFound(id))
    }

    pub fn retain(&self, id: ObjectId) -> Result<(), DatasetError> {
        let mut entry = self
            .objects
            .get_mut(&id)
            .ok_or(DatasetError::ObjectNotFound(id))?;
        entry.refcount += 1;
        debug!(object = %id, refcount = entry.refcount, "retained object");
        Ok(())
    }

    pub fn prune(&self, id: ObjectId) -> Result<(), DatasetError> {
        let should_remove = {
            let mut entry = self
                .objects
                .get_mut(&id)
                .ok_or(DatasetError::ObjectNotFound(id))?;
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.refcount == 0
        };
        if should_remove {
            self.objects.remove(&id);
            debug!(object = %id, "evicted object at refcount zero");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

impl<T: ElementType> Default for ObjectRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedRegistry<T> = Arc<ObjectRegistry<T>>;
