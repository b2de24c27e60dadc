use futures::channel::oneshot;
use tokio::sync::watch;

use crate::api::{tree, Comment, CommentId, CommentNode, CommentPatch, PostId};

/// What observers of a `CommentCache` get to see
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommentState {
    pub comments: Vec<CommentNode>,

    /// Number of rows held by the cache, including orphans not shown in `comments`
    pub total_count: usize,

    /// Number of comments actually present in `comments`
    pub visible_count: usize,

    /// Topic of the push channel currently feeding the cache, if any
    pub channel: Option<String>,
}

/// Handle on an active push subscription
///
/// Releasing it, either through `unsubscribe` or by dropping it, stops
/// whatever is consuming the subscription.
#[derive(Debug)]
pub struct ChannelHandle {
    topic: String,
    cancel: oneshot::Sender<()>,
}

impl ChannelHandle {
    /// Returns the handle, and the receiver that resolves once the handle is released
    pub fn new(topic: String) -> (ChannelHandle, oneshot::Receiver<()>) {
        let (cancel, cancelled) = oneshot::channel();
        (ChannelHandle { topic, cancel }, cancelled)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unsubscribe(self) {
        tracing::info!(topic = %self.topic, "unsubscribing from realtime channel");
        // the consumer may already be gone, in which case there is nothing to stop
        let _ = self.cancel.send(());
    }
}

/// In-memory copy of the comments of one post
///
/// The flat list of rows is authoritative, the tree is recomputed from it
/// after every mutation.
#[derive(Debug)]
pub struct CommentCache {
    post_id: PostId,
    rows: Vec<Comment>,
    channel: Option<ChannelHandle>,
    state: watch::Sender<CommentState>,
}

impl CommentCache {
    pub fn new(post_id: PostId) -> CommentCache {
        let (state, _) = watch::channel(CommentState::default());
        CommentCache {
            post_id,
            rows: Vec::new(),
            channel: None,
            state,
        }
    }

    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    pub fn subscribe(&self) -> watch::Receiver<CommentState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CommentState {
        self.state.borrow().clone()
    }

    pub fn total_count(&self) -> usize {
        self.rows.len()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Replaces the whole contents of the cache
    pub fn set_comments(&mut self, comments: Vec<Comment>) {
        tracing::debug!(post = ?self.post_id, num = comments.len(), "setting comments");
        self.rows = comments;
        self.publish();
    }

    /// Returns false if a comment with the same id was already known
    pub fn add_comment(&mut self, comment: Comment) -> bool {
        if self.rows.iter().any(|c| c.id == comment.id) {
            tracing::debug!(comment = ?comment.id, "comment already known, skipping");
            return false;
        }
        tracing::debug!(comment = ?comment.id, "adding comment");
        self.rows.push(comment);
        self.publish();
        true
    }

    /// Returns false, leaving the cache untouched, if `id` is not known
    pub fn update_comment(&mut self, id: CommentId, patch: CommentPatch) -> bool {
        match self.rows.iter_mut().find(|c| c.id == id) {
            None => {
                tracing::debug!(comment = ?id, "ignoring update of unknown comment");
                false
            }
            Some(c) => {
                patch.apply_to(c);
                self.publish();
                true
            }
        }
    }

    /// Replies to the removed comment stay in the cache but are no longer
    /// reachable from the tree, until the next `set_comments`
    pub fn remove_comment(&mut self, id: CommentId) -> bool {
        let before = self.rows.len();
        self.rows.retain(|c| c.id != id);
        let removed = self.rows.len() != before;
        if removed {
            tracing::debug!(comment = ?id, "removed comment");
            self.publish();
        }
        removed
    }

    /// Associates the cache with a push subscription, releasing any previous one
    pub fn set_channel(&mut self, channel: Option<ChannelHandle>) {
        if let Some(old) = std::mem::replace(&mut self.channel, channel) {
            old.unsubscribe();
        }
        let topic = self.channel.as_ref().map(|c| String::from(c.topic()));
        self.state.send_if_modified(|s| {
            if s.channel == topic {
                return false;
            }
            s.channel = topic;
            true
        });
    }

    /// Releases the push subscription and forgets every comment
    pub fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.unsubscribe();
        }
        self.rows.clear();
        self.state.send_replace(CommentState::default());
    }

    fn publish(&self) {
        let comments = tree::build_tree(self.rows.clone());
        let visible_count = tree::count_all(&comments);
        let total_count = self.rows.len();
        self.state.send_modify(|s| {
            s.comments = comments;
            s.total_count = total_count;
            s.visible_count = visible_count;
        });
    }
}

impl Drop for CommentCache {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.unsubscribe();
        }
    }
}
