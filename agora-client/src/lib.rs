mod cache;
pub use cache::{ChannelHandle, CommentCache, CommentState};

mod realtime;
pub use realtime::{CommentFeed, CommentSource, RealtimeComments};

pub mod api {
    pub use agora_api::*;
}
