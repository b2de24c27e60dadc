use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Weak,
};

use anyhow::Context;
use async_trait::async_trait;
use futures::{channel::oneshot, select_biased, stream::BoxStream, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::{
    api::{comments_topic, ChangeEvent, Comment, CommentId, CommentPatch, PostId},
    ChannelHandle, CommentCache, CommentState,
};

#[async_trait]
pub trait CommentSource: Send + Sync {
    /// All the comments of `post` by ascending creation date, joined with their author
    async fn fetch_comments(&self, post: PostId) -> anyhow::Result<Vec<Comment>>;

    async fn fetch_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>>;
}

#[async_trait]
pub trait CommentFeed: Send + Sync {
    /// Starts listening to `topic`, that carries the changes to the comments of `post`
    ///
    /// Returning means the subscription is active. Dropping the stream ends it.
    async fn subscribe(
        &self,
        topic: &str,
        post: PostId,
    ) -> anyhow::Result<BoxStream<'static, ChangeEvent>>;
}

/// Keeps a `CommentCache` in sync with the backend for one post
pub struct RealtimeComments<B> {
    post_id: PostId,
    backend: Arc<B>,
    cache: Arc<Mutex<CommentCache>>,
    subscribed: Arc<AtomicBool>,

    /// Bumped by every teardown, with the cache locked
    generation: Arc<AtomicU64>,
}

impl<B> RealtimeComments<B>
where
    B: 'static + CommentSource + CommentFeed,
{
    pub fn new(post_id: PostId, backend: Arc<B>) -> RealtimeComments<B> {
        RealtimeComments {
            post_id,
            backend,
            cache: Arc::new(Mutex::new(CommentCache::new(post_id))),
            subscribed: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    /// User-initiated mutations go through this same cache
    pub fn cache(&self) -> &Arc<Mutex<CommentCache>> {
        &self.cache
    }

    pub fn watch(&self) -> watch::Receiver<CommentState> {
        self.cache.lock().subscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Replaces the cache contents with a full fetch from the backend
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let comments = self
            .backend
            .fetch_comments(self.post_id)
            .await
            .with_context(|| format!("fetching comments of post {:?}", self.post_id));
        match comments {
            Ok(comments) => {
                self.cache.lock().set_comments(comments);
                Ok(())
            }
            Err(err) => {
                tracing::error!(?err, post = ?self.post_id, "failed to load comments");
                Err(err)
            }
        }
    }

    pub async fn handle_change(&self, event: ChangeEvent) {
        let epoch = Epoch::current(&self.generation);
        apply_change(&*self.backend, &self.cache, &epoch, self.post_id, event).await
    }

    /// Returns false without doing anything if a subscription is already active
    pub async fn subscribe(&self) -> anyhow::Result<bool> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            tracing::debug!(post = ?self.post_id, "realtime subscription already active");
            return Ok(false);
        }
        let epoch = Epoch::current(&self.generation);
        let topic = comments_topic(self.post_id);
        let events = match self.backend.subscribe(&topic, self.post_id).await {
            Ok(events) => events,
            Err(err) => {
                self.subscribed.store(false, Ordering::SeqCst);
                return Err(err).with_context(|| format!("subscribing to {topic}"));
            }
        };
        let cancelled = {
            let mut cache = match epoch.lock(&self.cache) {
                Some(cache) => cache,
                None => {
                    tracing::debug!(%topic, "torn down while subscribing, dropping subscription");
                    return Ok(false);
                }
            };
            tracing::info!(%topic, "realtime subscription active");
            let (handle, cancelled) = ChannelHandle::new(topic);
            cache.set_channel(Some(handle));
            cancelled
        };
        tokio::spawn(run_feed(
            self.backend.clone(),
            Arc::downgrade(&self.cache),
            self.subscribed.clone(),
            epoch,
            self.post_id,
            events,
            cancelled,
        ));
        Ok(true)
    }

    /// Releases the subscription and empties the cache
    ///
    /// Subscriptions and merges still in flight are dropped once they resume.
    pub fn teardown(&self) {
        let mut cache = self.cache.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        cache.teardown();
        self.subscribed.store(false, Ordering::SeqCst);
    }
}

async fn run_feed<B: CommentSource>(
    backend: Arc<B>,
    cache: Weak<Mutex<CommentCache>>,
    subscribed: Arc<AtomicBool>,
    epoch: Epoch,
    post_id: PostId,
    events: BoxStream<'static, ChangeEvent>,
    mut cancelled: oneshot::Receiver<()>,
) {
    let mut events = events.fuse();
    loop {
        select_biased! {
            _ = cancelled => {
                tracing::debug!(post = ?post_id, "realtime feed released");
                return;
            }
            event = events.next() => match event {
                None => break,
                Some(event) => {
                    let cache = match cache.upgrade() {
                        Some(cache) => cache,
                        None => return,
                    };
                    apply_change(&*backend, &cache, &epoch, post_id, event).await;
                }
            },
        }
    }

    tracing::warn!(post = ?post_id, "realtime feed closed by the backend");
    if let Ok(None) = cancelled.try_recv() {
        if let Some(cache) = cache.upgrade() {
            cache.lock().set_channel(None);
        }
        subscribed.store(false, Ordering::SeqCst);
    }
}

/// Number of teardowns seen when a subscription or a merge started
struct Epoch {
    generation: Arc<AtomicU64>,
    seen: u64,
}

impl Epoch {
    fn current(generation: &Arc<AtomicU64>) -> Epoch {
        Epoch {
            generation: generation.clone(),
            seen: generation.load(Ordering::SeqCst),
        }
    }

    /// Locks the cache, unless it was torn down since this epoch started
    fn lock<'a>(&self, cache: &'a Mutex<CommentCache>) -> Option<MutexGuard<'a, CommentCache>> {
        let cache = cache.lock();
        if self.generation.load(Ordering::SeqCst) != self.seen {
            return None;
        }
        Some(cache)
    }
}

async fn apply_change<B: CommentSource + ?Sized>(
    backend: &B,
    cache: &Mutex<CommentCache>,
    epoch: &Epoch,
    post_id: PostId,
    event: ChangeEvent,
) {
    if event.post_id() != post_id {
        tracing::warn!(
            expected = ?post_id,
            got = ?event.post_id(),
            "ignoring change event for another post"
        );
        return;
    }
    match event {
        ChangeEvent::Inserted { new } => {
            tracing::debug!(comment = ?new.id, "comment inserted");
            if let Some(c) = fetch_changed(backend, new.id).await {
                match epoch.lock(cache) {
                    Some(mut cache) => {
                        cache.add_comment(c);
                    }
                    None => tracing::debug!(comment = ?new.id, "cache torn down, dropping insert"),
                }
            }
        }
        ChangeEvent::Updated { new } => {
            tracing::debug!(comment = ?new.id, "comment updated");
            if let Some(c) = fetch_changed(backend, new.id).await {
                match epoch.lock(cache) {
                    Some(mut cache) => {
                        cache.update_comment(c.id, CommentPatch::from(c));
                    }
                    None => tracing::debug!(comment = ?new.id, "cache torn down, dropping update"),
                }
            }
        }
        ChangeEvent::Deleted { id, .. } => {
            tracing::debug!(comment = ?id, "comment deleted");
            if let Some(mut cache) = epoch.lock(cache) {
                cache.remove_comment(id);
            }
        }
    }
}

async fn fetch_changed<B: CommentSource + ?Sized>(backend: &B, id: CommentId) -> Option<Comment> {
    match backend.fetch_comment(id).await {
        Ok(Some(c)) => Some(c),
        Ok(None) => {
            tracing::warn!(comment = ?id, "changed comment is gone, dropping event");
            None
        }
        Err(err) => {
            tracing::error!(?err, comment = ?id, "failed fetching changed comment, dropping event");
            None
        }
    }
}
