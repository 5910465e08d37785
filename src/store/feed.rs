use tokio::sync::broadcast::{self, error::RecvError};

use super::{CollectionPath, DocPath};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Written(DocPath),
    Deleted(DocPath),
    /// The listener fell behind and dropped this many events; re-read the
    /// collection instead of trusting incremental state.
    Missed(u64),
}

impl Change {
    fn belongs_to(&self, collection: &CollectionPath) -> bool {
        match self {
            Change::Written(path) | Change::Deleted(path) => &path.collection() == collection,
            Change::Missed(_) => true,
        }
    }
}

/// Fan-out of committed writes to live listeners.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, change: Change) {
        // No listeners is the common case.
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self, collection: CollectionPath) -> Subscription {
        tracing::debug!(collection = %collection, "listener attached");
        Subscription {
            collection,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn active_listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live listener on one collection. Dropping the handle detaches it.
#[derive(Debug)]
pub struct Subscription {
    collection: CollectionPath,
    receiver: broadcast::Receiver<Change>,
}

impl Subscription {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Waits for the next change to a direct child of the collection.
    /// Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Change> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.belongs_to(&self.collection) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Some(Change::Missed(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        tracing::debug!(collection = %self.collection, "listener released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listeners_only_see_their_collection() {
        let feed = ChangeFeed::default();
        let donors = CollectionPath::parse("campaigns/c/participants/p/donors").unwrap();
        let mut subscription = feed.subscribe(donors.clone());

        feed.publish(Change::Written(
            DocPath::parse("campaigns/c/participants/p/guardians/g").unwrap(),
        ));
        feed.publish(Change::Written(donors.doc("d").unwrap()));

        assert_eq!(
            subscription.changed().await,
            Some(Change::Written(donors.doc("d").unwrap()))
        );
    }

    #[tokio::test]
    async fn dropping_subscription_releases_listener() {
        let feed = ChangeFeed::default();
        let subscription = feed.subscribe(CollectionPath::root("campaigns"));
        let other = feed.subscribe(CollectionPath::root("campaigns"));
        assert_eq!(feed.active_listeners(), 2);

        drop(subscription);
        assert_eq!(feed.active_listeners(), 1);
        drop(other);
        assert_eq!(feed.active_listeners(), 0);
    }
}
