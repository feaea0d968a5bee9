//! Synchronized List Registry
//!
//! Process-wide map from list name to the list currently active under that
//! name. The registration algorithm depends on the node role:
//!
//! - **Manager**: stale elements of a replaced list are announced as
//!   removed, the new list is installed, then every element of the new list
//!   is re-announced so already-connected clients learn its contents.
//! - **Client**: the list is installed and one bootstrap request is sent to
//!   the manager. The response is applied later by [`InboundSyncHandler`].
//!
//! [`InboundSyncHandler`]: super::InboundSyncHandler

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{BootstrapChannel, SyncObject, SynchronizedList, SynchronizedObjectList};
use crate::config::NodeRole;
use crate::error::{Error, Result};

/// Registry of synchronized lists for this node
pub struct SyncRegistry {
    /// Fixed role of this node
    role: NodeRole,
    /// Transport used for bootstrap requests and announcements
    channel: Arc<dyn BootstrapChannel>,
    /// Active list per name
    lists: DashMap<String, Arc<dyn SynchronizedList>>,
    /// Bootstrap requests awaiting a response (client only)
    pending_bootstraps: DashMap<String, Instant>,
}

impl SyncRegistry {
    /// Create a registry for a node with the given role
    pub fn new(role: NodeRole, channel: Arc<dyn BootstrapChannel>) -> Self {
        Self {
            role,
            channel,
            lists: DashMap::new(),
            pending_bootstraps: DashMap::new(),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_manager(&self) -> bool {
        self.role == NodeRole::Manager
    }

    /// Create an empty list wired for this node's role: announcing on the
    /// manager, a silent cache on clients. The list is not registered.
    pub fn create_list<T: SyncObject>(&self, name: impl Into<String>) -> SynchronizedObjectList<T> {
        let announcer = self.is_manager().then(|| Arc::clone(&self.channel));
        SynchronizedObjectList::new(name, announcer)
    }

    /// Register a list, replacing any list already registered under its name.
    ///
    /// The manager only accepts lists that announce their changes; build
    /// them with [`create_list`](Self::create_list).
    pub fn register<L: SynchronizedList>(&self, list: Arc<L>) -> Result<()> {
        let list: Arc<dyn SynchronizedList> = list;
        let name = list.identification_name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidListName(name));
        }
        if self.is_manager() && !list.is_authoritative() {
            return Err(Error::NotAuthoritative(name));
        }

        match self.role {
            NodeRole::Manager => self.register_as_manager(name, list),
            NodeRole::Client => self.register_as_client(name, list),
        }

        Ok(())
    }

    fn register_as_manager(&self, name: String, list: Arc<dyn SynchronizedList>) {
        if let Some(old) = self.get(&name) {
            if same_list(&old, &list) {
                tracing::debug!("List {} re-registered with the same instance", name);
            } else {
                let stale = old.cached_ids();
                tracing::debug!("Replacing list {}, removing {} stale objects", name, stale.len());
                for id in stale {
                    if let Err(e) = old.remove_cached(&id) {
                        tracing::warn!("Failed to announce removal of {} from {}: {}", id, name, e);
                    }
                }
            }
        }

        self.lists.insert(name.clone(), Arc::clone(&list));

        let current = list.cached_ids();
        tracing::info!("Registered list {} with {} objects", name, current.len());
        for id in current {
            if let Err(e) = list.update_cached(&id) {
                tracing::warn!("Failed to announce {} in {}: {}", id, name, e);
            }
        }
    }

    fn register_as_client(&self, name: String, list: Arc<dyn SynchronizedList>) {
        self.lists.insert(name.clone(), list);
        tracing::info!("Registered list {}, requesting snapshot from manager", name);
        self.request_bootstrap(&name);
    }

    fn request_bootstrap(&self, name: &str) {
        self.pending_bootstraps.insert(name.to_string(), Instant::now());
        if let Err(e) = self.channel.request_all_cached_objects(name) {
            tracing::warn!("Failed to request objects of list {}: {}", name, e);
        }
    }

    /// Look up the list registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn SynchronizedList>> {
        self.lists.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a list and check its element type
    pub fn get_list<T: SyncObject>(&self, name: &str) -> Result<Option<Arc<SynchronizedObjectList<T>>>> {
        let Some(list) = self.get(name) else {
            return Ok(None);
        };

        list.as_any()
            .downcast::<SynchronizedObjectList<T>>()
            .map(Some)
            .map_err(|_| Error::ListTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Remove the list registered under `name`. Local only; clients keep
    /// whatever they cached.
    pub fn unregister(&self, name: &str) {
        if self.lists.remove(name).is_some() {
            tracing::info!("Unregistered list {}", name);
        }
        self.pending_bootstraps.remove(name);
    }

    /// Re-send bootstrap requests for every registered list.
    ///
    /// Called by clients once the primary connection is back. No-op on the
    /// manager, which holds the authoritative copies.
    pub fn resynchronize(&self) -> usize {
        if self.is_manager() {
            return 0;
        }

        let names = self.list_names();
        for name in &names {
            self.request_bootstrap(name);
        }
        tracing::info!("Requested resynchronization of {} lists", names.len());
        names.len()
    }

    /// Mark the bootstrap of `name` as answered
    pub fn complete_bootstrap(&self, name: &str) {
        if let Some((_, requested_at)) = self.pending_bootstraps.remove(name) {
            tracing::debug!("Bootstrap of {} answered after {:?}", name, requested_at.elapsed());
        }
    }

    /// Lists whose bootstrap response has been outstanding longer than `older_than`
    pub fn stale_bootstraps(&self, older_than: Duration) -> Vec<String> {
        self.pending_bootstraps
            .iter()
            .filter(|entry| entry.value().elapsed() >= older_than)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Names of all registered lists
    pub fn list_names(&self) -> Vec<String> {
        self.lists.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

fn same_list(a: &Arc<dyn SynchronizedList>, b: &Arc<dyn SynchronizedList>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
