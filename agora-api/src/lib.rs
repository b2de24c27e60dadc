use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod action;
pub use action::Action;

mod auth;
pub use auth::{AuthToken, Caller, Role};

mod comment;
pub use comment::{
    Comment, CommentEdit, CommentId, CommentList, CommentNode, CommentPatch, CommentRow,
    NewComment, PostId,
};

mod db;
pub use db::Db;

mod error;
pub use error::Error;

mod feed;
pub use feed::{comments_topic, ChangeEvent, FeedMessage};

pub mod tree;

mod user;
pub use user::{Author, UserId};

// Strings end up in postgres text columns, which reject null bytes
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Comment bodies must contain something other than whitespace
pub fn validate_content(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyContent);
    }
    Ok(())
}
