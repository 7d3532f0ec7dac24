use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::trace;
use uuid::Uuid;

use plaza_types::events::FeedEvent;

const BROADCAST_CAPACITY: usize = 1024;

/// Fans feed events out to every connected client and tracks who is online.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for feed events; every subscriber receives every event
    broadcast_tx: broadcast::Sender<FeedEvent>,

    /// user_id -> (display name, open connections)
    online_users: RwLock<HashMap<Uuid, (String, usize)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: FeedEvent) {
        trace!("Publishing event for post {:?}", event.post_id());
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub async fn user_online(&self, user_id: Uuid, name: String) {
        let mut users = self.inner.online_users.write().await;
        let entry = users.entry(user_id).or_insert((name, 0));
        entry.1 += 1;
    }

    /// Drop one connection for `user_id`; the user goes offline with the last one.
    pub async fn user_offline(&self, user_id: Uuid) {
        let mut users = self.inner.online_users.write().await;
        if let Some(entry) = users.get_mut(&user_id) {
            entry.1 -= 1;
            if entry.1 == 0 {
                users.remove(&user_id);
            }
        }
    }

    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, (name, _))| (*id, name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        let post_id = Uuid::new_v4();
        dispatcher.publish(FeedEvent::PostDelete { post_id });

        assert_eq!(a.recv().await.unwrap(), FeedEvent::PostDelete { post_id });
        assert_eq!(b.recv().await.unwrap(), FeedEvent::PostDelete { post_id });
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        Dispatcher::new().publish(FeedEvent::PostDelete { post_id: Uuid::new_v4() });
    }

    #[tokio::test]
    async fn presence_counts_connections() {
        let dispatcher = Dispatcher::new();
        let ada = Uuid::new_v4();

        dispatcher.user_online(ada, "Ada".into()).await;
        dispatcher.user_online(ada, "Ada".into()).await;
        dispatcher.user_offline(ada).await;
        assert_eq!(dispatcher.online_users().await, vec![(ada, "Ada".to_string())]);

        dispatcher.user_offline(ada).await;
        assert!(dispatcher.online_users().await.is_empty());
    }
}
