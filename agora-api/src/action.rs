use anyhow::Context;

use crate::{CommentEdit, CommentId, Db, Error, NewComment, PostId};

/// A user-initiated mutation of the comments of a post
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Action {
    NewComment { post_id: PostId, comment: NewComment },
    EditComment { comment_id: CommentId, edit: CommentEdit },
    DeleteComment(CommentId),
}

impl Action {
    /// Checks that `db.current_user()` may perform this action and that its
    /// contents are valid
    ///
    /// The outer error is for failures to query `db`, the inner one is to be
    /// reported to the caller.
    pub async fn check<D: Db + Send>(&self, db: &mut D) -> anyhow::Result<Result<(), Error>> {
        let caller = db.current_user();
        Ok(match self {
            Action::NewComment { post_id, comment } => {
                if let Err(e) = crate::validate_content(&comment.content) {
                    return Ok(Err(e));
                }
                match comment.parent_id {
                    None => Ok(()),
                    Some(parent) => match db
                        .comment_info(parent)
                        .await
                        .with_context(|| format!("fetching info of parent comment {parent:?}"))?
                    {
                        Some((_, parent_post)) if parent_post == *post_id => Ok(()),
                        _ => Err(Error::ParentNotFound(parent)),
                    },
                }
            }
            Action::EditComment { comment_id, edit } => {
                match db
                    .comment_info(*comment_id)
                    .await
                    .with_context(|| format!("fetching info of comment {comment_id:?}"))?
                {
                    None => Err(Error::CommentNotFound(*comment_id)),
                    Some((author, _)) if !caller.can_modify(author) => {
                        Err(Error::PermissionDenied)
                    }
                    Some(_) => crate::validate_content(&edit.content),
                }
            }
            Action::DeleteComment(comment_id) => {
                match db
                    .comment_info(*comment_id)
                    .await
                    .with_context(|| format!("fetching info of comment {comment_id:?}"))?
                {
                    None => Err(Error::CommentNotFound(*comment_id)),
                    Some((author, _)) if !caller.can_modify(author) => {
                        Err(Error::PermissionDenied)
                    }
                    Some(_) => Ok(()),
                }
            }
        })
    }
}
