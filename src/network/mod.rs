//! Network Module
//!
//! Handles TCP sessions between the manager and wrapper nodes, and the
//! connection lifecycle that drives reconnects.

mod backoff;
mod client;
mod connection;
mod lifecycle;
mod server;

pub use backoff::Backoff;
pub use client::{ManagerClient, OutboundQueue};
pub use connection::{Connection, ConnectionId, ConnectionState, PrimaryConnection};
pub use lifecycle::{ConnectionHandler, ConnectionLifecycleMonitor, Reconnector};
pub use server::{ManagerServer, SessionHub, SessionLogger};

use crate::protocol::{FrameHeader, Message};
use crate::error::{Error, Result};

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    check_frame_length(header.length as usize)?;

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    // Deserialize
    let message = Message::deserialize(&body)?;
    Ok(message)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    check_frame_length(body.len())?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

/// Reject bodies the peer would refuse, before anything is written
fn check_frame_length(length: usize) -> Result<()> {
    if length > FrameHeader::MAX_LENGTH as usize {
        return Err(Error::FrameTooLarge(length));
    }
    Ok(())
}

/// Whether a read error just means the peer closed the session
pub(crate) fn is_disconnect(error: &Error) -> bool {
    match error {
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_framed_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Message::GetAllCachedObjects { list_name: "services".into() };

        write_message(&mut a, &msg).await.unwrap();
        match read_message(&mut b).await.unwrap() {
            Message::GetAllCachedObjects { list_name } => assert_eq!(list_name, "services"),
            other => panic!("unexpected {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_checksum_mismatch_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = Message::Hello { node_id: "w".into() }.serialize().unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 0xdead_beef;

        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();

        assert!(matches!(read_message(&mut b).await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(64);
        let header = FrameHeader {
            length: FrameHeader::MAX_LENGTH + 1,
            checksum: 0,
        };
        a.write_all(&header.to_bytes()).await.unwrap();

        assert!(matches!(read_message(&mut b).await, Err(Error::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_oversized_message_not_written() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let msg = Message::CachedObjects {
            list_name: "services".into(),
            objects: vec![crate::sync::ObjectEnvelope {
                id: "huge".into(),
                payload: vec![0u8; FrameHeader::MAX_LENGTH as usize + 1],
            }],
        };

        let result = write_message(&mut a, &msg).await;
        assert!(matches!(result, Err(Error::FrameTooLarge(_))));

        // nothing reached the peer
        drop(a);
        assert!(is_disconnect(&read_message(&mut b).await.unwrap_err()));
    }

    #[test]
    fn test_frame_length_limit() {
        assert!(check_frame_length(FrameHeader::MAX_LENGTH as usize).is_ok());
        assert!(check_frame_length(FrameHeader::MAX_LENGTH as usize + 1).is_err());
    }

    #[tokio::test]
    async fn test_closed_stream_is_disconnect() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_message(&mut b).await.unwrap_err();
        assert!(is_disconnect(&err));
    }
}
