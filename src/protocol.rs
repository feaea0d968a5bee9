//! Wire Protocol
//!
//! Defines the messages exchanged between the manager and wrapper nodes.

use serde::{Deserialize, Serialize};

use crate::sync::{AnnounceKind, ObjectEnvelope};

/// Protocol messages for manager/wrapper communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // ========== Session ==========
    /// First message on a new session (wrapper to manager)
    Hello {
        node_id: String,
    },

    /// Session accepted
    HelloAck {
        manager_id: String,
    },

    // ========== List Bootstrap ==========
    /// Request every object cached under a list (wrapper to manager)
    GetAllCachedObjects {
        list_name: String,
    },

    /// Snapshot of a list at response time
    CachedObjects {
        list_name: String,
        objects: Vec<ObjectEnvelope>,
    },

    // ========== Announcements ==========
    /// One element of a list was added, updated or removed (manager to wrappers)
    ListUpdate {
        list_name: String,
        kind: AnnounceKind,
        object: ObjectEnvelope,
    },

    // ========== Error ==========
    /// Error response
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No list registered under the requested name
    UnknownList,
    /// Request not valid for the receiving node's role
    WrongRole,
    /// Internal error
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "Hello",
            Message::HelloAck { .. } => "HelloAck",
            Message::GetAllCachedObjects { .. } => "GetAllCachedObjects",
            Message::CachedObjects { .. } => "CachedObjects",
            Message::ListUpdate { .. } => "ListUpdate",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body accepted from a peer
    pub const MAX_LENGTH: u32 = 64 * 1024 * 1024;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::ListUpdate {
            list_name: "services".to_string(),
            kind: AnnounceKind::Removed,
            object: ObjectEnvelope {
                id: "lobby-1".to_string(),
                payload: vec![1, 2, 3],
            },
        };

        let bytes = msg.serialize().unwrap();
        let restored = Message::deserialize(&bytes).unwrap();

        match restored {
            Message::ListUpdate { list_name, kind, object } => {
                assert_eq!(list_name, "services");
                assert_eq!(kind, AnnounceKind::Removed);
                assert_eq!(object.id, "lobby-1");
                assert_eq!(object.payload, vec![1, 2, 3]);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_frame_header() {
        let data = b"test message data";
        let header = FrameHeader::new(data);
        let bytes = header.to_bytes();
        let restored = FrameHeader::from_bytes(&bytes);

        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
        assert_eq!(restored.length as usize, data.len());
    }
}
