use std::{collections::HashMap, sync::Arc};

use agora_client::{
    api::{
        tree, Action, AuthToken, Author, Caller, ChangeEvent, Comment, CommentEdit, CommentId,
        CommentList, CommentRow, Db, Error, NewComment, PostId, Role, UserId, Uuid,
    },
    CommentFeed, CommentSource,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::{channel::mpsc, stream::BoxStream, StreamExt};
use tokio::sync::{Mutex, MutexGuard};

/// In-memory stand-in for the data store, auth and push channel of the real backend
#[derive(Debug, Default)]
pub struct MockServer {
    users: HashMap<UserId, DbUser>,
    sessions: HashMap<AuthToken, UserId>,
    posts: HashMap<PostId, DbPost>,

    /// In creation order
    comments: Vec<CommentRow>,

    feeds: HashMap<PostId, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    failing: bool,
}

#[derive(Debug)]
struct DbUser {
    profile: Author,
    role: Role,
}

#[derive(Debug, Default)]
struct DbPost {
    comment_count: usize,
}

struct MockDb<'a> {
    server: &'a MockServer,
    caller: Caller,
}

#[async_trait]
impl Db for MockDb<'_> {
    fn current_user(&self) -> Caller {
        self.caller
    }

    async fn comment_info(&mut self, c: CommentId) -> anyhow::Result<Option<(UserId, PostId)>> {
        Ok(self
            .server
            .comments
            .iter()
            .find(|r| r.id == c)
            .map(|r| (r.author_id, r.post_id)))
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    /// Makes every fetch and subscription fail until called again with false
    pub fn test_set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn test_num_feeds(&self, post: PostId) -> usize {
        self.feeds
            .get(&post)
            .map(|f| f.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn create_user(&mut self, profile: Author, role: Role) {
        self.users.insert(profile.id, DbUser { profile, role });
    }

    pub fn create_session(&mut self, user: UserId) -> Result<AuthToken, Error> {
        if !self.users.contains_key(&user) {
            return Err(Error::PermissionDenied);
        }
        let tok = AuthToken(Uuid::new_v4());
        self.sessions.insert(tok, user);
        Ok(tok)
    }

    pub fn create_post(&mut self) -> PostId {
        let id = PostId(Uuid::new_v4());
        self.posts.insert(id, DbPost::default());
        id
    }

    pub fn comment_count(&self, post: PostId) -> Option<usize> {
        self.posts.get(&post).map(|p| p.comment_count)
    }

    fn resolve(&self, tok: Option<AuthToken>) -> Result<Caller, Error> {
        let user = tok
            .and_then(|tok| self.sessions.get(&tok))
            .ok_or(Error::Unauthenticated)?;
        let role = self
            .users
            .get(user)
            .map(|u| u.role)
            .ok_or(Error::Unauthenticated)?;
        Ok(Caller { user: *user, role })
    }

    fn join_author(&self, row: &CommentRow) -> Option<Comment> {
        let author = self.users.get(&row.author_id)?.profile.clone();
        Some(Comment::from_row(row.clone(), author))
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.failing {
            return Err(anyhow!("mock server is set to fail"));
        }
        Ok(())
    }

    pub fn fetch_comments(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
        self.check_available()?;
        let mut res = self
            .comments
            .iter()
            .filter(|r| r.post_id == post)
            .filter_map(|r| self.join_author(r))
            .collect::<Vec<_>>();
        res.sort_by_key(|c| c.created_at);
        Ok(res)
    }

    pub fn fetch_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        self.check_available()?;
        Ok(self
            .comments
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| self.join_author(r)))
    }

    pub fn list_comments(&self, post: PostId) -> anyhow::Result<CommentList> {
        let flat = self.fetch_comments(post)?;
        let total_count = flat.len();
        Ok(CommentList {
            comments: tree::build_tree(flat),
            total_count,
        })
    }

    async fn check(&self, tok: Option<AuthToken>, action: &Action) -> Result<Caller, Error> {
        let caller = self.resolve(tok)?;
        let mut db = MockDb {
            server: self,
            caller,
        };
        action
            .check(&mut db)
            .await
            .map_err(|e| Error::Unknown(format!("{e:?}")))??;
        Ok(caller)
    }

    pub async fn create_comment(
        &mut self,
        tok: Option<AuthToken>,
        post_id: PostId,
        new: NewComment,
    ) -> Result<Comment, Error> {
        let content = String::from(new.trimmed_content());
        let parent_id = new.parent_id;
        let caller = self
            .check(
                tok,
                &Action::NewComment {
                    post_id,
                    comment: new,
                },
            )
            .await?;
        let now = Utc::now();
        let row = CommentRow {
            id: CommentId(Uuid::new_v4()),
            post_id,
            author_id: caller.user,
            parent_id,
            content,
            is_edited: false,
            like_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.comments.push(row.clone());
        self.refresh_comment_count(post_id);
        self.relay(ChangeEvent::Inserted { new: row.clone() });
        self.join_author(&row)
            .ok_or_else(|| Error::Unknown(String::from("comment author vanished")))
    }

    pub async fn edit_comment(
        &mut self,
        tok: Option<AuthToken>,
        comment_id: CommentId,
        edit: CommentEdit,
    ) -> Result<Comment, Error> {
        let content = String::from(edit.trimmed_content());
        self.check(tok, &Action::EditComment { comment_id, edit })
            .await?;
        let row = self
            .comments
            .iter_mut()
            .find(|r| r.id == comment_id)
            .ok_or(Error::CommentNotFound(comment_id))?;
        row.content = content;
        row.is_edited = true;
        row.updated_at = Utc::now();
        let row = row.clone();
        self.relay(ChangeEvent::Updated { new: row.clone() });
        self.join_author(&row)
            .ok_or_else(|| Error::Unknown(String::from("comment author vanished")))
    }

    /// Replies to the deleted comment are left in place
    pub async fn delete_comment(
        &mut self,
        tok: Option<AuthToken>,
        comment_id: CommentId,
    ) -> Result<(), Error> {
        self.check(tok, &Action::DeleteComment(comment_id)).await?;
        let pos = self
            .comments
            .iter()
            .position(|r| r.id == comment_id)
            .ok_or(Error::CommentNotFound(comment_id))?;
        let row = self.comments.remove(pos);
        self.refresh_comment_count(row.post_id);
        self.relay(ChangeEvent::Deleted {
            id: row.id,
            post_id: row.post_id,
        });
        Ok(())
    }

    pub fn comment_feed(
        &mut self,
        post: PostId,
    ) -> anyhow::Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        self.check_available()?;
        let (sender, receiver) = mpsc::unbounded();
        self.feeds.entry(post).or_default().push(sender);
        Ok(receiver)
    }

    fn refresh_comment_count(&mut self, post: PostId) {
        let count = self.comments.iter().filter(|r| r.post_id == post).count();
        match self.posts.get_mut(&post) {
            Some(p) => p.comment_count = count,
            None => tracing::warn!(?post, "comment on unknown post, not counting"),
        }
    }

    fn relay(&mut self, e: ChangeEvent) {
        if let Some(feeds) = self.feeds.get_mut(&e.post_id()) {
            feeds.retain(|f| f.unbounded_send(e.clone()).is_ok());
        }
    }
}

/// A `MockServer` usable as the backend of a `RealtimeComments`
#[derive(Clone, Debug, Default)]
pub struct SharedMock(Arc<Mutex<MockServer>>);

impl SharedMock {
    pub fn new(server: MockServer) -> SharedMock {
        SharedMock(Arc::new(Mutex::new(server)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, MockServer> {
        self.0.lock().await
    }
}

#[async_trait]
impl CommentSource for SharedMock {
    async fn fetch_comments(&self, post: PostId) -> anyhow::Result<Vec<Comment>> {
        self.lock().await.fetch_comments(post)
    }

    async fn fetch_comment(&self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        self.lock().await.fetch_comment(id)
    }
}

#[async_trait]
impl CommentFeed for SharedMock {
    async fn subscribe(
        &self,
        topic: &str,
        post: PostId,
    ) -> anyhow::Result<BoxStream<'static, ChangeEvent>> {
        tracing::debug!(%topic, "mock subscription");
        Ok(self.lock().await.comment_feed(post)?.boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agora_client::{api::tree, RealtimeComments};

    use super::*;

    struct Fixture {
        server: MockServer,
        post: PostId,
        alice: Option<AuthToken>,
        bob: Option<AuthToken>,
        admin: Option<AuthToken>,
    }

    fn profile(name: &str) -> Author {
        Author {
            id: UserId(Uuid::new_v4()),
            username: String::from(name),
            full_name: None,
            avatar_url: None,
        }
    }

    fn fixture() -> Fixture {
        let mut server = MockServer::new();
        let post = server.create_post();
        let mut login = |name: &str, role| {
            let p = profile(name);
            let id = p.id;
            server.create_user(p, role);
            Some(server.create_session(id).expect("creating session"))
        };
        let alice = login("alice", Role::Member);
        let bob = login("bob", Role::Member);
        let admin = login("admin", Role::Admin);
        Fixture {
            server,
            post,
            alice,
            bob,
            admin,
        }
    }

    fn new_comment(content: &str, parent_id: Option<CommentId>) -> NewComment {
        NewComment {
            content: String::from(content),
            parent_id,
        }
    }

    fn edit(content: &str) -> CommentEdit {
        CommentEdit {
            content: String::from(content),
        }
    }

    #[tokio::test]
    async fn creating_needs_a_session() {
        let mut f = fixture();
        assert_eq!(
            f.server
                .create_comment(None, f.post, new_comment("hi", None))
                .await,
            Err(Error::Unauthenticated)
        );
        assert_eq!(
            f.server
                .create_comment(Some(AuthToken::stub()), f.post, new_comment("hi", None))
                .await,
            Err(Error::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn created_comments_are_trimmed_and_counted() {
        let mut f = fixture();
        let mut feed = f.server.comment_feed(f.post).unwrap();
        let c = f
            .server
            .create_comment(f.alice, f.post, new_comment("  hello  ", None))
            .await
            .unwrap();
        assert_eq!(c.content, "hello");
        assert_eq!(c.author.username, "alice");
        assert!(!c.is_edited);
        assert_eq!(f.server.comment_count(f.post), Some(1));
        assert_eq!(
            feed.next().await,
            Some(ChangeEvent::Inserted { new: c.row() })
        );
    }

    #[tokio::test]
    async fn empty_comments_are_rejected() {
        let mut f = fixture();
        assert_eq!(
            f.server
                .create_comment(f.alice, f.post, new_comment(" \t ", None))
                .await,
            Err(Error::EmptyContent)
        );
        assert_eq!(f.server.comment_count(f.post), Some(0));
    }

    #[tokio::test]
    async fn only_author_or_admin_can_edit() {
        let mut f = fixture();
        let c = f
            .server
            .create_comment(f.alice, f.post, new_comment("original", None))
            .await
            .unwrap();

        assert_eq!(
            f.server.edit_comment(f.bob, c.id, edit("hijacked")).await,
            Err(Error::PermissionDenied)
        );
        assert_eq!(
            f.server.fetch_comment(c.id).unwrap().unwrap().content,
            "original"
        );

        let edited = f
            .server
            .edit_comment(f.alice, c.id, edit("fixed"))
            .await
            .unwrap();
        assert_eq!(edited.content, "fixed");
        assert!(edited.is_edited);

        let moderated = f
            .server
            .edit_comment(f.admin, c.id, edit("moderated"))
            .await
            .unwrap();
        assert_eq!(moderated.content, "moderated");
        assert!(moderated.is_edited);
    }

    #[tokio::test]
    async fn editing_a_missing_comment() {
        let mut f = fixture();
        let missing = CommentId(Uuid::new_v4());
        assert_eq!(
            f.server.edit_comment(f.alice, missing, edit("x")).await,
            Err(Error::CommentNotFound(missing))
        );
        assert_eq!(
            f.server.delete_comment(f.alice, missing).await,
            Err(Error::CommentNotFound(missing))
        );
    }

    #[tokio::test]
    async fn deleting_a_parent_orphans_its_replies() {
        let mut f = fixture();
        let parent = f
            .server
            .create_comment(f.alice, f.post, new_comment("parent", None))
            .await
            .unwrap();
        let reply = f
            .server
            .create_comment(f.bob, f.post, new_comment("reply", Some(parent.id)))
            .await
            .unwrap();
        assert_eq!(
            f.server.delete_comment(f.bob, parent.id).await,
            Err(Error::PermissionDenied)
        );
        f.server.delete_comment(f.admin, parent.id).await.unwrap();

        let list = f.server.list_comments(f.post).unwrap();
        assert_eq!(list.total_count, 1);
        assert!(list.comments.is_empty());
        assert_eq!(f.server.comment_count(f.post), Some(1));
        assert!(f.server.fetch_comment(reply.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn replies_to_other_posts_are_rejected() {
        let mut f = fixture();
        let other_post = f.server.create_post();
        let parent = f
            .server
            .create_comment(f.alice, other_post, new_comment("elsewhere", None))
            .await
            .unwrap();
        assert_eq!(
            f.server
                .create_comment(f.alice, f.post, new_comment("reply", Some(parent.id)))
                .await,
            Err(Error::ParentNotFound(parent.id))
        );
    }

    async fn wait_for_count(rt: &RealtimeComments<SharedMock>, count: usize) {
        let mut state = rt.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.borrow_and_update().total_count != count {
                state.changed().await.expect("cache went away");
            }
        })
        .await
        .expect("cache did not converge in time")
    }

    #[tokio::test]
    async fn realtime_cache_follows_the_server() {
        let f = fixture();
        let (post, alice, bob) = (f.post, f.alice, f.bob);
        let mock = SharedMock::new(f.server);
        let first = mock
            .lock()
            .await
            .create_comment(alice, post, new_comment("first", None))
            .await
            .unwrap();

        let rt = RealtimeComments::new(post, Arc::new(mock.clone()));
        assert!(rt.subscribe().await.unwrap());
        rt.refresh().await.unwrap();
        assert_eq!(rt.cache().lock().total_count(), 1);

        let reply = mock
            .lock()
            .await
            .create_comment(bob, post, new_comment("reply", Some(first.id)))
            .await
            .unwrap();
        wait_for_count(&rt, 2).await;
        {
            let state = rt.cache().lock().state();
            let node = tree::find(&state.comments, &reply.id).expect("reply is in the tree");
            assert_eq!(node.comment.author.username, "bob");
            assert_eq!(state.comments[0].replies.len(), 1);
        }

        mock.lock()
            .await
            .edit_comment(bob, reply.id, edit("reply, edited"))
            .await
            .unwrap();
        let mut state = rt.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let edited = tree::find(&state.borrow_and_update().comments, &reply.id)
                    .map(|n| n.comment.is_edited)
                    .unwrap_or(false);
                if edited {
                    break;
                }
                state.changed().await.expect("cache went away");
            }
        })
        .await
        .expect("edit did not reach the cache");

        mock.lock().await.delete_comment(bob, reply.id).await.unwrap();
        wait_for_count(&rt, 1).await;

        rt.teardown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while mock.lock().await.test_num_feeds(post) != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("feed was not released");
    }

    #[tokio::test]
    async fn realtime_refresh_reports_failures() {
        let mut server = MockServer::new();
        let post = server.create_post();
        server.test_set_failing(true);
        let mock = SharedMock::new(server);
        let rt = RealtimeComments::new(post, Arc::new(mock));
        assert!(rt.refresh().await.is_err());
        assert!(rt.subscribe().await.is_err());
        assert!(!rt.is_subscribed());
    }
}
