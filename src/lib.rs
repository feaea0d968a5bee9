//! WolfCloud - Synchronized Object List Replication
//!
//! Keeps named lists of objects consistent between a cloud manager and the
//! wrapper nodes connected to it.
//!
//! # Architecture
//!
//! The manager owns the authoritative copy of every list and announces each
//! change to all connected wrappers. Wrappers register local caches, fill
//! them with a bootstrap request, and keep them current from announcements.
//! When a wrapper loses its primary connection it reloads its connection
//! settings and reconnects, then re-requests every list.
//!
//! # Features
//!
//! - Type-safe synchronized lists behind a type-erased registry
//! - Role-specific registration (manager re-announce, client bootstrap)
//! - Framed, checksummed TCP protocol between manager and wrappers
//! - Reconnect loop with exponential backoff and live config reload
//! - Replicated membership list of connected wrappers

pub mod config;
pub mod error;
pub mod sync;
pub mod protocol;
pub mod network;
pub mod cluster;

pub use config::WolfCloudConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{NodeRole, WolfCloudConfig};
    pub use crate::error::{Error, Result};
    pub use crate::sync::{SyncObject, SyncRegistry, SynchronizedList, SynchronizedObjectList};
    pub use crate::protocol::Message;
    pub use crate::network::{ConnectionLifecycleMonitor, ManagerClient, ManagerServer};
}
