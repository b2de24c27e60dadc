use async_trait::async_trait;

use crate::{Caller, CommentId, PostId, UserId};

#[async_trait]
pub trait Db {
    fn current_user(&self) -> Caller;

    /// Returns the author and owning post of a comment, or None if there is no such comment
    async fn comment_info(&mut self, c: CommentId) -> anyhow::Result<Option<(UserId, PostId)>>;
}
