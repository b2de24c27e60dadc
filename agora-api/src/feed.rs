use crate::{CommentId, CommentRow, PostId};

/// Name of the push channel carrying the comment changes of one post
pub fn comments_topic(post: PostId) -> String {
    format!("comments:post_id=eq.{}", post.0)
}

/// A change to a single comment row, as seen by the push channel
///
/// Row images never carry author metadata, consumers must fetch it themselves.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ChangeEvent {
    Inserted { new: CommentRow },
    Updated { new: CommentRow },
    Deleted { id: CommentId, post_id: PostId },
}

impl ChangeEvent {
    pub fn post_id(&self) -> PostId {
        match self {
            ChangeEvent::Inserted { new } | ChangeEvent::Updated { new } => new.post_id,
            ChangeEvent::Deleted { post_id, .. } => *post_id,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    Change(ChangeEvent),
}
