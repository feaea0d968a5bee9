//! Synchronized Object Lists
//!
//! Named collections of identity-bearing objects replicated from the
//! manager to every connected wrapper node.

mod list;
mod registry;
mod handler;

pub use list::{SynchronizedList, SynchronizedObjectList};
pub use registry::SyncRegistry;
pub use handler::InboundSyncHandler;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An element that can live in a synchronized list
pub trait SyncObject: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identity of this object within its list
    fn sync_id(&self) -> String;
}

/// Kind of change carried by an announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnounceKind {
    Added,
    Updated,
    Removed,
}

impl std::fmt::Display for AnnounceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnounceKind::Added => write!(f, "ADDED"),
            AnnounceKind::Updated => write!(f, "UPDATED"),
            AnnounceKind::Removed => write!(f, "REMOVED"),
        }
    }
}

/// A list element encoded for the wire, tagged with its identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEnvelope {
    /// Identity of the encoded object
    pub id: String,
    /// bincode-encoded object
    pub payload: Vec<u8>,
}

impl ObjectEnvelope {
    /// Encode an object
    pub fn encode<T: SyncObject>(object: &T) -> Result<Self> {
        Ok(Self {
            id: object.sync_id(),
            payload: bincode::serialize(object)?,
        })
    }

    /// Decode the payload
    pub fn decode<T: SyncObject>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

/// One element change pushed by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub list_name: String,
    pub kind: AnnounceKind,
    pub object: ObjectEnvelope,
}

/// Transport seam used by lists and the registry.
///
/// Both operations enqueue and return; neither may block on the network.
pub trait BootstrapChannel: Send + Sync {
    /// Ask the manager for every object cached under `list_name` (client side)
    fn request_all_cached_objects(&self, list_name: &str) -> Result<()>;

    /// Push one element change to connected clients (manager side)
    fn announce(&self, announcement: Announcement) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for sync tests

    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ServiceRecord {
        pub name: String,
        pub port: u16,
    }

    impl ServiceRecord {
        pub fn new(name: &str, port: u16) -> Self {
            Self { name: name.to_string(), port }
        }
    }

    impl SyncObject for ServiceRecord {
        fn sync_id(&self) -> String {
            self.name.clone()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PlayerRecord {
        pub uuid: String,
    }

    impl SyncObject for PlayerRecord {
        fn sync_id(&self) -> String {
            self.uuid.clone()
        }
    }

    /// Records every call instead of touching the network
    #[derive(Default)]
    pub struct RecordingChannel {
        pub requests: Mutex<Vec<String>>,
        pub announcements: Mutex<Vec<Announcement>>,
    }

    impl RecordingChannel {
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        pub fn announcements(&self) -> Vec<(AnnounceKind, String)> {
            self.announcements
                .lock()
                .unwrap()
                .iter()
                .map(|a| (a.kind, a.object.id.clone()))
                .collect()
        }
    }

    impl BootstrapChannel for RecordingChannel {
        fn request_all_cached_objects(&self, list_name: &str) -> Result<()> {
            self.requests.lock().unwrap().push(list_name.to_string());
            Ok(())
        }

        fn announce(&self, announcement: Announcement) -> Result<()> {
            self.announcements.lock().unwrap().push(announcement);
            Ok(())
        }
    }
}
