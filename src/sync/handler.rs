//! Inbound Sync Handler
//!
//! Applies list messages received from the network. On the manager this
//! answers bootstrap requests with a snapshot; on a client it applies
//! snapshots and announcements to the locally registered lists.

use std::sync::Arc;

use super::{AnnounceKind, SyncRegistry};
use crate::error::Result;
use crate::protocol::{ErrorCode, Message};

/// Routes inbound list messages into the registry
pub struct InboundSyncHandler {
    registry: Arc<SyncRegistry>,
}

impl InboundSyncHandler {
    pub fn new(registry: Arc<SyncRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    /// Handle one message from `peer`, queueing any reply through `reply`.
    ///
    /// Only a failing `reply` is returned as an error; problems with the
    /// message itself are logged or answered with [`Message::Error`].
    pub fn handle<F>(&self, peer: &str, message: Message, mut reply: F) -> Result<()>
    where
        F: FnMut(Message) -> Result<()>,
    {
        match message {
            Message::GetAllCachedObjects { list_name } => self.answer_bootstrap(peer, list_name, &mut reply),
            Message::CachedObjects { list_name, objects } => {
                self.registry.complete_bootstrap(&list_name);
                let Some(list) = self.registry.get(&list_name) else {
                    tracing::debug!("Dropping snapshot for unregistered list {}", list_name);
                    return Ok(());
                };

                match list.replace_all(&objects) {
                    Ok(()) => tracing::info!("Synchronized list {} with {} objects", list_name, objects.len()),
                    Err(e) => tracing::warn!("Failed to apply snapshot of list {}: {}", list_name, e),
                }
                Ok(())
            }
            Message::ListUpdate { list_name, kind, object } => {
                if self.registry.is_manager() {
                    tracing::warn!("Ignoring {} announcement for {} from {}", kind, list_name, peer);
                    return Ok(());
                }

                match self.registry.get(&list_name) {
                    Some(list) => {
                        if let Err(e) = list.apply_announcement(kind, &object) {
                            tracing::warn!("Failed to apply {} of {} to list {}: {}", kind, object.id, list_name, e);
                        }
                    }
                    None => tracing::trace!("Ignoring update for unregistered list {}", list_name),
                }
                Ok(())
            }
            Message::Error { code, message } => {
                tracing::warn!("Peer {} reported {:?}: {}", peer, code, message);
                Ok(())
            }
            other => {
                tracing::trace!("Ignoring message type {} from {}", other.type_name(), peer);
                Ok(())
            }
        }
    }

    fn answer_bootstrap<F>(&self, peer: &str, list_name: String, reply: &mut F) -> Result<()>
    where
        F: FnMut(Message) -> Result<()>,
    {
        if !self.registry.is_manager() {
            return reply(Message::Error {
                code: ErrorCode::WrongRole,
                message: "bootstrap requests must be sent to the manager".into(),
            });
        }

        let Some(list) = self.registry.get(&list_name) else {
            tracing::warn!("Peer {} requested unknown list {}", peer, list_name);
            return reply(Message::Error {
                code: ErrorCode::UnknownList,
                message: format!("list {} is not registered", list_name),
            });
        };

        // the reply is queued before the list can announce another change
        let mut delivered = false;
        let result = list.with_snapshot(&mut |objects| {
            delivered = true;
            tracing::debug!("Sending {} objects of {} to {}", objects.len(), list_name, peer);
            reply(Message::CachedObjects {
                list_name: list_name.clone(),
                objects,
            })
        });

        match result {
            Err(e) if !delivered => reply(Message::Error {
                code: ErrorCode::Internal,
                message: format!("failed to encode list {}: {}", list_name, e),
            }),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeRole;
    use crate::sync::testing::{RecordingChannel, ServiceRecord};
    use crate::sync::ObjectEnvelope;

    fn handler(role: NodeRole) -> InboundSyncHandler {
        let channel = Arc::new(RecordingChannel::default());
        InboundSyncHandler::new(Arc::new(SyncRegistry::new(role, channel)))
    }

    /// Handle a message and collect what it replies
    fn replies(handler: &InboundSyncHandler, message: Message) -> Vec<Message> {
        let mut sent = Vec::new();
        handler
            .handle("peer", message, |reply| {
                sent.push(reply);
                Ok(())
            })
            .unwrap();
        sent
    }

    fn snapshot(list_name: &str, records: &[ServiceRecord]) -> Message {
        Message::CachedObjects {
            list_name: list_name.into(),
            objects: records.iter().map(|r| ObjectEnvelope::encode(r).unwrap()).collect(),
        }
    }

    #[test]
    fn test_manager_answers_with_snapshot() {
        let handler = handler(NodeRole::Manager);
        let list = Arc::new(
            handler
                .registry()
                .create_list::<ServiceRecord>("services")
                .with_objects([ServiceRecord::new("lobby-1", 25565)]),
        );
        handler.registry().register(list).unwrap();

        let sent = replies(&handler, Message::GetAllCachedObjects { list_name: "services".into() });

        match sent.as_slice() {
            [Message::CachedObjects { list_name, objects }] => {
                assert_eq!(list_name, "services");
                assert_eq!(objects.len(), 1);
                let record: ServiceRecord = objects[0].decode().unwrap();
                assert_eq!(record, ServiceRecord::new("lobby-1", 25565));
            }
            other => panic!("unexpected replies {:?}", other),
        }
    }

    #[test]
    fn test_failed_reply_is_returned() {
        let handler = handler(NodeRole::Manager);
        handler
            .registry()
            .register(Arc::new(handler.registry().create_list::<ServiceRecord>("services")))
            .unwrap();

        let result = handler.handle(
            "peer",
            Message::GetAllCachedObjects { list_name: "services".into() },
            |_| Err(crate::Error::ChannelClosed),
        );
        assert!(matches!(result, Err(crate::Error::ChannelClosed)));
    }

    #[test]
    fn test_manager_reports_unknown_list() {
        let handler = handler(NodeRole::Manager);
        let sent = replies(&handler, Message::GetAllCachedObjects { list_name: "nope".into() });
        assert!(matches!(
            sent.as_slice(),
            [Message::Error { code: ErrorCode::UnknownList, .. }]
        ));
    }

    #[test]
    fn test_client_refuses_bootstrap_requests() {
        let handler = handler(NodeRole::Client);
        let sent = replies(&handler, Message::GetAllCachedObjects { list_name: "services".into() });
        assert!(matches!(
            sent.as_slice(),
            [Message::Error { code: ErrorCode::WrongRole, .. }]
        ));
    }

    #[test]
    fn test_client_applies_snapshot_and_updates() {
        let handler = handler(NodeRole::Client);
        let list = Arc::new(handler.registry().create_list::<ServiceRecord>("services"));
        handler.registry().register(Arc::clone(&list)).unwrap();
        assert_eq!(handler.registry().stale_bootstraps(std::time::Duration::ZERO).len(), 1);

        let sent = replies(
            &handler,
            snapshot("services", &[ServiceRecord::new("a", 1), ServiceRecord::new("b", 2)]),
        );
        assert!(sent.is_empty());
        assert_eq!(list.len(), 2);
        assert!(handler.registry().stale_bootstraps(std::time::Duration::ZERO).is_empty());

        replies(
            &handler,
            Message::ListUpdate {
                list_name: "services".into(),
                kind: AnnounceKind::Removed,
                object: ObjectEnvelope::encode(&ServiceRecord::new("a", 1)).unwrap(),
            },
        );
        replies(
            &handler,
            Message::ListUpdate {
                list_name: "services".into(),
                kind: AnnounceKind::Updated,
                object: ObjectEnvelope::encode(&ServiceRecord::new("b", 20)).unwrap(),
            },
        );

        assert!(list.get("a").is_none());
        assert_eq!(list.get("b").unwrap().port, 20);
    }

    #[test]
    fn test_resync_snapshot_drops_entries_removed_meanwhile() {
        let handler = handler(NodeRole::Client);
        let list = Arc::new(handler.registry().create_list::<ServiceRecord>("services"));
        handler.registry().register(Arc::clone(&list)).unwrap();
        replies(
            &handler,
            snapshot("services", &[ServiceRecord::new("a", 1), ServiceRecord::new("b", 2)]),
        );

        // "b" was removed on the manager while the announcement could not arrive
        assert_eq!(handler.registry().resynchronize(), 1);
        replies(&handler, snapshot("services", &[ServiceRecord::new("a", 1)]));

        let mut names = list
            .get_all_cached_objects()
            .into_iter()
            .map(|r| r.name)
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_undecodable_snapshot_keeps_cache() {
        let handler = handler(NodeRole::Client);
        let list = Arc::new(
            handler
                .registry()
                .create_list::<ServiceRecord>("services")
                .with_objects([ServiceRecord::new("a", 1)]),
        );
        handler.registry().register(Arc::clone(&list)).unwrap();

        replies(
            &handler,
            Message::CachedObjects {
                list_name: "services".into(),
                objects: vec![ObjectEnvelope { id: "x".into(), payload: vec![0xff] }],
            },
        );
        assert_eq!(list.get("a"), Some(ServiceRecord::new("a", 1)));
    }

    #[test]
    fn test_updates_for_unregistered_list_are_dropped() {
        let handler = handler(NodeRole::Client);
        let sent = replies(
            &handler,
            Message::ListUpdate {
                list_name: "players".into(),
                kind: AnnounceKind::Added,
                object: ObjectEnvelope { id: "x".into(), payload: vec![] },
            },
        );
        assert!(sent.is_empty());
        assert!(handler.registry().get("players").is_none());
    }
}
