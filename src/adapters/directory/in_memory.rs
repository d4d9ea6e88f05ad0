//! In-process connection directory backed by a sharded concurrent map.
//!
//! Suitable for a single bridge instance. Reads never wait on writers of
//! other shards, so the dispatcher and relay can look up sessions while the
//! lifecycle controller registers or removes others.

use dashmap::DashMap;

use crate::domain::foundation::ConnectionId;
use crate::ports::{ConnectionDirectory, SessionEntry};

/// [`ConnectionDirectory`] over a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryConnectionDirectory {
    entries: DashMap<ConnectionId, SessionEntry>,
}

impl InMemoryConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionDirectory for InMemoryConnectionDirectory {
    fn register(&self, entry: SessionEntry) -> Option<SessionEntry> {
        let previous = self.entries.insert(entry.connection_id(), entry);
        if let Some(previous) = &previous {
            tracing::warn!(
                connection_id = %previous.connection_id(),
                "Replaced existing session entry"
            );
        }
        previous
    }

    fn lookup(&self, connection: &ConnectionId) -> Option<SessionEntry> {
        self.entries.get(connection).map(|entry| entry.value().clone())
    }

    fn remove(&self, connection: &ConnectionId) -> Option<SessionEntry> {
        self.entries.remove(connection).map(|(_, entry)| entry)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use secrecy::SecretString;

    use crate::adapters::xmpp::MockMessagingBackend;
    use crate::domain::bridge::{Jid, Username};
    use crate::ports::{ClientConnection, MessagingBackend};

    async fn entry(name: &str) -> SessionEntry {
        let backend = MockMessagingBackend::new();
        let session = backend
            .connect(
                &Jid::bare(name, "example.com"),
                &SecretString::new("pw".to_string()),
            )
            .await
            .unwrap();
        let (client, _rx) = ClientConnection::new(ConnectionId::new(), Username::new(name).unwrap());
        SessionEntry::new(client, session)
    }

    #[tokio::test]
    async fn register_then_lookup_returns_entry() {
        let directory = InMemoryConnectionDirectory::new();
        let entry = entry("alice").await;
        let id = entry.connection_id();

        assert!(directory.register(entry).is_none());

        let found = directory.lookup(&id).unwrap();
        assert_eq!(found.session.account().to_string(), "alice@example.com");
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn lookup_of_unknown_connection_is_absent() {
        let directory = InMemoryConnectionDirectory::new();
        assert!(directory.lookup(&ConnectionId::new()).is_none());
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn register_overwrites_prior_entry_for_same_connection() {
        let directory = InMemoryConnectionDirectory::new();
        let first = entry("alice").await;
        let id = first.connection_id();
        let mut second = entry("alice2").await;
        second.client = first.client.clone();

        directory.register(first);
        let replaced = directory.register(second).unwrap();

        assert_eq!(replaced.session.account().to_string(), "alice@example.com");
        assert_eq!(
            directory.lookup(&id).unwrap().session.account().to_string(),
            "alice2@example.com"
        );
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let directory = InMemoryConnectionDirectory::new();
        let entry = entry("alice").await;
        let id = entry.connection_id();
        directory.register(entry);

        assert!(directory.remove(&id).is_some());
        assert!(directory.remove(&id).is_none());
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn concurrent_registrations_are_all_visible() {
        let directory = Arc::new(InMemoryConnectionDirectory::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                let entry = entry(&format!("user{}", i)).await;
                let id = entry.connection_id();
                directory.register(entry);
                id
            }));
        }

        for handle in handles {
            let id = handle.await.unwrap();
            assert!(directory.lookup(&id).is_some());
        }
        assert_eq!(directory.len(), 16);
    }
}
