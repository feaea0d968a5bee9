//! Wrapper Membership
//!
//! The manager keeps one record per connected wrapper in the `wrappers`
//! list, so every node can see which wrappers are currently attached.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sync::{SyncObject, SyncRegistry, SynchronizedObjectList};

/// Name of the membership list
pub const WRAPPERS_LIST: &str = "wrappers";

/// A wrapper attached to the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperRecord {
    /// Node ID announced in `Hello`
    pub node_id: String,
    /// Remote address of the session
    pub address: String,
    /// Session that announced this wrapper
    pub session_id: String,
    /// When the session was established
    pub connected_at: DateTime<Utc>,
}

impl SyncObject for WrapperRecord {
    fn sync_id(&self) -> String {
        self.node_id.clone()
    }
}

/// Create and register the membership list for this node's role
pub fn register_wrappers_list(registry: &SyncRegistry) -> Result<Arc<SynchronizedObjectList<WrapperRecord>>> {
    let list = Arc::new(registry.create_list::<WrapperRecord>(WRAPPERS_LIST));
    registry.register(Arc::clone(&list))?;
    Ok(list)
}

/// Record a wrapper that completed its handshake (manager only)
pub fn wrapper_connected(registry: &SyncRegistry, record: WrapperRecord) {
    match registry.get_list::<WrapperRecord>(WRAPPERS_LIST) {
        Ok(Some(list)) => {
            tracing::info!("Wrapper {} attached from {}", record.node_id, record.address);
            if let Err(e) = list.update(record) {
                tracing::warn!("Failed to announce wrapper: {}", e);
            }
        }
        Ok(None) => tracing::trace!("No {} list registered", WRAPPERS_LIST),
        Err(e) => tracing::warn!("Cannot record wrapper {}: {}", record.node_id, e),
    }
}

/// Drop the record of a wrapper whose session ended, unless a newer session
/// of the same wrapper has already replaced it (manager only)
pub fn wrapper_disconnected(registry: &SyncRegistry, node_id: &str, session_id: &str) {
    let list = match registry.get_list::<WrapperRecord>(WRAPPERS_LIST) {
        Ok(Some(list)) => list,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Cannot remove wrapper {}: {}", node_id, e);
            return;
        }
    };

    match list.get(node_id) {
        Some(record) if record.session_id == session_id => {
            tracing::info!("Wrapper {} detached", node_id);
            if let Err(e) = list.remove_by_id(node_id) {
                tracing::warn!("Failed to announce wrapper removal: {}", e);
            }
        }
        Some(_) => tracing::debug!("Wrapper {} already reconnected, keeping newer record", node_id),
        None => {}
    }
}
