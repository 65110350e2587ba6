//! Publisher/subscriber registry: one entry per mount, fanning a publisher's
//! byte stream out to every attached subscriber with bounded, drop-on-full
//! buffering.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{NtripError, Result};
use crate::sourcetable::Sourcetable;
use crate::supervisor::{chunk_channel, try_send_chunk, DEFAULT_CHUNK_CAPACITY};

/// Authorization seam. The default accepts every credential pair, since
/// policy is out of scope for this core.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, mount: &str, user: &str, password: &str) -> bool;
}

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _mount: &str, _user: &str, _password: &str) -> bool {
        true
    }
}

struct Mount {
    has_publisher: bool,
    subscribers: HashMap<u64, mpsc::Sender<Vec<u8>>>,
    next_subscriber_id: u64,
}

impl Mount {
    fn new() -> Self {
        Self {
            has_publisher: false,
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        }
    }
}

/// A publisher's write handle into a mount. Call [`PublisherHandle::close`]
/// when done to free the mount's publisher slot for the next caller —
/// releasing the slot requires an `await` on the mount lock, so it cannot
/// happen implicitly on drop.
pub struct PublisherHandle {
    mount_name: String,
    mount: Arc<Mutex<Mount>>,
    closed: bool,
}

impl PublisherHandle {
    /// Copy `bytes` and fan them out to every current subscriber, dropping
    /// the chunk for any subscriber whose channel is full. Never blocks.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(NtripError::Closed);
        }
        let mount = self.mount.lock().await;
        for tx in mount.subscribers.values() {
            try_send_chunk(tx, bytes.to_vec());
        }
        Ok(())
    }

    pub async fn close(mut self) {
        self.close_inner().await;
    }

    async fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut mount = self.mount.lock().await;
        mount.has_publisher = false;
        let _ = &self.mount_name;
    }
}

/// A subscriber's read-only handle into a mount's fan-out channel.
pub struct SubscriberHandle {
    mount_name: String,
    id: u64,
    mount: Arc<Mutex<Mount>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl SubscriberHandle {
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Remove this subscriber from the mount's subscriber set. Called on
    /// cancellation or peer disconnect.
    pub async fn unsubscribe(self) {
        let mut mount = self.mount.lock().await;
        mount.subscribers.remove(&self.id);
        let _ = &self.mount_name;
    }
}

/// The mount registry: a top-level reader/writer lock over the map, with a
/// per-mount lock guarding that mount's publisher slot and subscriber set.
pub struct SourceService {
    mounts: RwLock<HashMap<String, Arc<Mutex<Mount>>>>,
    authorizer: Box<dyn Authorizer>,
    chunk_capacity: usize,
}

impl SourceService {
    pub fn new(authorizer: Box<dyn Authorizer>) -> Self {
        Self {
            mounts: RwLock::new(HashMap::new()),
            authorizer,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
        }
    }

    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }

    async fn mount_for(&self, name: &str) -> Arc<Mutex<Mount>> {
        if let Some(m) = self.mounts.read().await.get(name) {
            return m.clone();
        }
        let mut mounts = self.mounts.write().await;
        mounts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Mount::new())))
            .clone()
    }

    /// Immutable snapshot of the current mount set, rendered as a
    /// sourcetable's stream entries.
    pub async fn sourcetable(&self) -> Sourcetable {
        use crate::sourcetable::StreamEntry;
        let mounts = self.mounts.read().await;
        let mut names: Vec<&String> = mounts.keys().collect();
        names.sort();
        let streams = names
            .into_iter()
            .map(|name| StreamEntry {
                name: name.clone(),
                identifier: name.clone(),
                ..Default::default()
            })
            .collect();
        Sourcetable {
            streams,
            ..Default::default()
        }
    }

    /// Bind a publisher to `mount`, creating it if it doesn't exist yet.
    /// Fails with [`NtripError::Conflict`] if a publisher is already bound.
    pub async fn publisher(&self, mount: &str, user: &str, password: &str) -> Result<PublisherHandle> {
        if !self.authorizer.authorize(mount, user, password) {
            return Err(NtripError::Auth);
        }
        let handle = self.mount_for(mount).await;
        let mut guard = handle.lock().await;
        if guard.has_publisher {
            return Err(NtripError::Conflict);
        }
        guard.has_publisher = true;
        drop(guard);
        Ok(PublisherHandle {
            mount_name: mount.to_string(),
            mount: handle,
            closed: false,
        })
    }

    /// Attach a subscriber to `mount`, creating it if it doesn't exist yet.
    /// A mount that was never published to simply has no bytes to deliver.
    pub async fn subscriber(&self, mount: &str, user: &str, password: &str) -> Result<SubscriberHandle> {
        if !self.authorizer.authorize(mount, user, password) {
            return Err(NtripError::Auth);
        }
        let handle = self.mount_for(mount).await;
        let (tx, rx) = chunk_channel(self.chunk_capacity);
        let mut guard = handle.lock().await;
        let id = guard.next_subscriber_id;
        guard.next_subscriber_id += 1;
        guard.subscribers.insert(id, tx);
        drop(guard);
        Ok(SubscriberHandle {
            mount_name: mount.to_string(),
            id,
            mount: handle,
            rx,
        })
    }

    /// True if `mount` has ever been created (has a publisher, a subscriber,
    /// or previously had either — mounts are never destroyed).
    pub async fn mount_exists(&self, mount: &str) -> bool {
        self.mounts.read().await.contains_key(mount)
    }
}

impl Default for SourceService {
    fn default() -> Self {
        Self::new(Box::new(AllowAll))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_delivers_bytes() {
        let svc = SourceService::default();
        let publisher = svc.publisher("TEST", "u", "p").await.unwrap();
        let mut subscriber = svc.subscriber("TEST", "u", "p").await.unwrap();
        publisher.write(b"hello").await.unwrap();
        assert_eq!(subscriber.recv().await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn second_publisher_on_same_mount_conflicts() {
        let svc = SourceService::default();
        let _first = svc.publisher("TEST", "u", "p").await.unwrap();
        let second = svc.publisher("TEST", "u", "p").await;
        assert!(matches!(second, Err(NtripError::Conflict)));
    }

    #[tokio::test]
    async fn publisher_slot_reopens_after_close() {
        let svc = SourceService::default();
        let first = svc.publisher("TEST", "u", "p").await.unwrap();
        first.close().await;
        let second = svc.publisher("TEST", "u", "p").await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_mount_set() {
        let svc = SourceService::default();
        let publisher = svc.publisher("TEST", "u", "p").await.unwrap();
        let subscriber = svc.subscriber("TEST", "u", "p").await.unwrap();
        subscriber.unsubscribe().await;
        // No subscribers left, so a write should have nothing to deliver to
        // (it must still succeed — best-effort fan-out).
        assert!(publisher.write(b"x").await.is_ok());
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let svc = SourceService::default().with_chunk_capacity(1);
        let publisher = svc.publisher("TEST", "u", "p").await.unwrap();
        let mut slow = svc.subscriber("TEST", "u", "p").await.unwrap();
        let mut fast = svc.subscriber("TEST", "u", "p").await.unwrap();

        for i in 0..5u8 {
            publisher.write(&[i]).await.unwrap();
        }
        // The fast subscriber drains promptly and sees the most recent chunk
        // it was able to receive without the slow one stalling delivery.
        let mut got = Vec::new();
        while let Ok(Some(chunk)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), fast.recv()).await
        {
            got.push(chunk);
        }
        assert!(!got.is_empty());
        // The slow subscriber's channel holds at most its capacity worth.
        let first = slow.recv().await;
        assert!(first.is_some());
    }

    struct DenyAll;
    impl Authorizer for DenyAll {
        fn authorize(&self, _mount: &str, _user: &str, _password: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn deny_all_authorizer_rejects_publisher_and_subscriber() {
        let svc = SourceService::new(Box::new(DenyAll));
        assert!(matches!(
            svc.publisher("TEST", "u", "p").await,
            Err(NtripError::Auth)
        ));
        assert!(matches!(
            svc.subscriber("TEST", "u", "p").await,
            Err(NtripError::Auth)
        ));
    }

    #[tokio::test]
    async fn mount_created_lazily_and_never_destroyed() {
        let svc = SourceService::default();
        assert!(!svc.mount_exists("TEST").await);
        let sub = svc.subscriber("TEST", "u", "p").await.unwrap();
        assert!(svc.mount_exists("TEST").await);
        sub.unsubscribe().await;
        assert!(svc.mount_exists("TEST").await);
    }
}
