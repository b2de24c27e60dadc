use uuid::Uuid;

use crate::{Author, Time, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

/// A comment exactly as stored, without any author metadata
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentRow {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,

    /// None for root comments
    pub parent_id: Option<CommentId>,

    pub content: String,
    pub is_edited: bool,
    pub like_count: i64,
    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub is_edited: bool,
    pub like_count: i64,
    pub created_at: Time,
    pub updated_at: Time,

    pub author: Author,
}

impl Comment {
    pub fn from_row(row: CommentRow, author: Author) -> Comment {
        Comment {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            parent_id: row.parent_id,
            content: row.content,
            is_edited: row.is_edited,
            like_count: row.like_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            author,
        }
    }

    pub fn row(&self) -> CommentRow {
        CommentRow {
            id: self.id,
            post_id: self.post_id,
            author_id: self.author_id,
            parent_id: self.parent_id,
            content: self.content.clone(),
            is_edited: self.is_edited,
            like_count: self.like_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Tree form of a comment: the comment itself plus the replies pointing at it
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,

    /// Replies in the order they were found in the flat list
    pub replies: Vec<CommentNode>,
}

/// Fields to overwrite on an existing comment, anything left to None is kept
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPatch {
    pub content: Option<String>,
    pub is_edited: Option<bool>,
    pub like_count: Option<i64>,
    pub updated_at: Option<Time>,
    pub author: Option<Author>,
}

impl CommentPatch {
    pub fn apply_to(self, c: &mut Comment) {
        if let Some(content) = self.content {
            c.content = content;
        }
        if let Some(is_edited) = self.is_edited {
            c.is_edited = is_edited;
        }
        if let Some(like_count) = self.like_count {
            c.like_count = like_count;
        }
        if let Some(updated_at) = self.updated_at {
            c.updated_at = updated_at;
        }
        if let Some(author) = self.author {
            c.author = author;
        }
    }
}

impl From<Comment> for CommentPatch {
    fn from(c: Comment) -> CommentPatch {
        CommentPatch {
            content: Some(c.content),
            is_edited: Some(c.is_edited),
            like_count: Some(c.like_count),
            updated_at: Some(c.updated_at),
            author: Some(c.author),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    pub fn trimmed_content(&self) -> &str {
        self.content.trim()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentEdit {
    pub content: String,
}

impl CommentEdit {
    pub fn trimmed_content(&self) -> &str {
        self.content.trim()
    }
}

/// Response to a listing of the comments of a post
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentList {
    pub comments: Vec<CommentNode>,

    /// Number of rows, including those that could not be placed in the tree
    pub total_count: usize,
}
