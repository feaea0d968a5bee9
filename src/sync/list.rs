//! Synchronized Object List
//!
//! A named, concurrently mutable collection of identity-bearing objects.
//! Lists created on the manager carry an announcer and push every change to
//! connected clients; client lists are plain caches filled by inbound
//! snapshots and announcements.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use super::{AnnounceKind, Announcement, BootstrapChannel, ObjectEnvelope, SyncObject};
use crate::error::Result;

/// Type-erased view of a list, as stored in the registry
pub trait SynchronizedList: Send + Sync + 'static {
    /// Cluster-wide unique name of this list
    fn identification_name(&self) -> &str;

    /// Snapshot of the ids currently cached
    fn cached_ids(&self) -> Vec<String>;

    /// Remove the cached element with this id, announcing the removal.
    /// Returns false if nothing was cached under `id`.
    fn remove_cached(&self, id: &str) -> Result<bool>;

    /// Re-upsert the cached element with this id, announcing an update.
    /// Returns false if nothing was cached under `id`.
    fn update_cached(&self, id: &str) -> Result<bool>;

    /// Encode every cached element and hand the snapshot to `deliver`.
    /// No change is announced between taking the snapshot and `deliver`
    /// returning, so a snapshot queued by `deliver` is never overtaken by
    /// an announcement it already reflects.
    fn with_snapshot(&self, deliver: &mut dyn FnMut(Vec<ObjectEnvelope>) -> Result<()>) -> Result<()>;

    /// Apply a change received from the manager without re-announcing it
    fn apply_announcement(&self, kind: AnnounceKind, object: &ObjectEnvelope) -> Result<()>;

    /// Make the cache hold exactly `objects`, dropping every id the snapshot
    /// does not contain. Nothing is changed if any object fails to decode.
    fn replace_all(&self, objects: &[ObjectEnvelope]) -> Result<()>;

    /// Whether changes to this list are pushed to clients
    fn is_authoritative(&self) -> bool;

    /// Name of the element type, for diagnostics
    fn element_type(&self) -> &'static str;

    /// Upcast for typed access
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A replicated list of `T`
pub struct SynchronizedObjectList<T: SyncObject> {
    /// Cluster-wide unique name
    identification_name: String,
    /// Cached objects keyed by identity
    cached: DashMap<String, T>,
    /// Present on authoritative (manager) lists
    announcer: Option<Arc<dyn BootstrapChannel>>,
    /// Held while a change is applied and announced, and while a snapshot
    /// is taken and delivered
    changes: Mutex<()>,
}

impl<T: SyncObject> SynchronizedObjectList<T> {
    /// Create a list that announces every change through `announcer`
    pub fn new(name: impl Into<String>, announcer: Option<Arc<dyn BootstrapChannel>>) -> Self {
        Self {
            identification_name: name.into(),
            cached: DashMap::new(),
            announcer,
            changes: Mutex::new(()),
        }
    }

    /// Create a list that never announces (a client-side cache)
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Seed the cache without announcing, before the list is registered
    pub fn with_objects(self, objects: impl IntoIterator<Item = T>) -> Self {
        for object in objects {
            self.cached.insert(object.sync_id(), object);
        }
        self
    }

    /// Cluster-wide unique name of this list
    pub fn identification_name(&self) -> &str {
        &self.identification_name
    }

    /// Whether changes to this list are pushed to clients
    pub fn is_authoritative(&self) -> bool {
        self.announcer.is_some()
    }

    /// Insert a new object
    pub fn add(&self, object: T) -> Result<()> {
        let _changes = self.lock_changes();
        self.cached.insert(object.sync_id(), object.clone());
        self.announce(AnnounceKind::Added, &object)
    }

    /// Insert or replace an object by identity
    pub fn update(&self, object: T) -> Result<()> {
        let _changes = self.lock_changes();
        self.cached.insert(object.sync_id(), object.clone());
        self.announce(AnnounceKind::Updated, &object)
    }

    /// Remove an object by identity, returning the cached copy
    pub fn remove(&self, object: &T) -> Result<Option<T>> {
        self.remove_by_id(&object.sync_id())
    }

    /// Remove an object by its id, returning the cached copy
    pub fn remove_by_id(&self, id: &str) -> Result<Option<T>> {
        let _changes = self.lock_changes();
        match self.cached.remove(id) {
            Some((_, removed)) => {
                self.announce(AnnounceKind::Removed, &removed)?;
                Ok(Some(removed))
            }
            None => Ok(None),
        }
    }

    /// Get a copy of the cached object with this id
    pub fn get(&self, id: &str) -> Option<T> {
        self.cached.get(id).map(|entry| entry.value().clone())
    }

    /// Copy of every cached object
    pub fn get_all_cached_objects(&self) -> Vec<T> {
        self.cached.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }

    fn lock_changes(&self) -> MutexGuard<'_, ()> {
        self.changes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn announce(&self, kind: AnnounceKind, object: &T) -> Result<()> {
        let Some(ref announcer) = self.announcer else {
            return Ok(());
        };

        tracing::trace!(
            "Announcing {} of {} in list {}",
            kind,
            object.sync_id(),
            self.identification_name
        );

        announcer.announce(Announcement {
            list_name: self.identification_name.clone(),
            kind,
            object: ObjectEnvelope::encode(object)?,
        })
    }
}

impl<T: SyncObject> SynchronizedList for SynchronizedObjectList<T> {
    fn identification_name(&self) -> &str {
        &self.identification_name
    }

    fn cached_ids(&self) -> Vec<String> {
        self.cached.iter().map(|entry| entry.key().clone()).collect()
    }

    fn remove_cached(&self, id: &str) -> Result<bool> {
        Ok(self.remove_by_id(id)?.is_some())
    }

    fn update_cached(&self, id: &str) -> Result<bool> {
        match self.get(id) {
            Some(object) => {
                self.update(object)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn with_snapshot(&self, deliver: &mut dyn FnMut(Vec<ObjectEnvelope>) -> Result<()>) -> Result<()> {
        let _changes = self.lock_changes();
        let snapshot = self
            .get_all_cached_objects()
            .iter()
            .map(ObjectEnvelope::encode)
            .collect::<Result<Vec<_>>>()?;
        deliver(snapshot)
    }

    fn apply_announcement(&self, kind: AnnounceKind, object: &ObjectEnvelope) -> Result<()> {
        let _changes = self.lock_changes();
        match kind {
            AnnounceKind::Added | AnnounceKind::Updated => {
                let decoded: T = object.decode()?;
                self.cached.insert(decoded.sync_id(), decoded);
            }
            AnnounceKind::Removed => {
                self.cached.remove(&object.id);
            }
        }
        Ok(())
    }

    fn replace_all(&self, objects: &[ObjectEnvelope]) -> Result<()> {
        let decoded = objects
            .iter()
            .map(|object| object.decode::<T>())
            .collect::<Result<Vec<_>>>()?;

        let _changes = self.lock_changes();
        let keep: HashSet<String> = decoded.iter().map(SyncObject::sync_id).collect();
        self.cached.retain(|id, _| keep.contains(id));
        for object in decoded {
            self.cached.insert(object.sync_id(), object);
        }
        Ok(())
    }

    fn is_authoritative(&self) -> bool {
        self.announcer.is_some()
    }

    fn element_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: SyncObject> std::fmt::Debug for SynchronizedObjectList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedObjectList")
            .field("identification_name", &self.identification_name)
            .field("len", &self.cached.len())
            .field("authoritative", &self.is_authoritative())
            .finish()
    }
}
