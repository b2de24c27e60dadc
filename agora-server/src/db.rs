use agora_api::{
    Author, AuthToken, Caller, Comment, CommentId, CommentRow, PostId, Role, Time, UserId,
};
use anyhow::Context;
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Row};

use crate::Error;

pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
    pub caller: Caller,
}

#[async_trait::async_trait]
impl<'a> agora_api::Db for PostgresDb<'a> {
    fn current_user(&self) -> Caller {
        self.caller
    }

    async fn comment_info(&mut self, c: CommentId) -> anyhow::Result<Option<(UserId, PostId)>> {
        let row = sqlx::query("SELECT author_id, post_id FROM comments WHERE id = $1")
            .bind(c.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying author of comment {c:?}"))?;
        row.map(|r| -> anyhow::Result<_> {
            Ok((
                UserId(r.try_get("author_id")?),
                PostId(r.try_get("post_id")?),
            ))
        })
        .transpose()
    }
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<Caller, Error> {
    let row = sqlx::query(
        "
            UPDATE sessions
                SET last_active = NOW()
            FROM profiles
            WHERE sessions.id = $1
            AND profiles.id = sessions.user_id
            RETURNING profiles.id, profiles.is_admin
        ",
    )
    .bind(token.0)
    .fetch_optional(conn)
    .await
    .context("recovering session")?
    .ok_or_else(Error::unauthenticated)?;
    let user = UserId(row.try_get("id").context("reading session user")?);
    let is_admin: bool = row.try_get("is_admin").context("reading session role")?;
    Ok(Caller {
        user,
        role: if is_admin { Role::Admin } else { Role::Member },
    })
}

const COMMENT_COLUMNS: &str = "
    c.id, c.post_id, c.author_id, c.parent_id, c.content, c.is_edited, c.like_count,
    c.created_at, c.updated_at,
    p.username, p.full_name, p.avatar_url
";

fn row_from_pg(r: &PgRow) -> anyhow::Result<CommentRow> {
    Ok(CommentRow {
        id: CommentId(r.try_get("id")?),
        post_id: PostId(r.try_get("post_id")?),
        author_id: UserId(r.try_get("author_id")?),
        parent_id: r
            .try_get::<Option<agora_api::Uuid>, _>("parent_id")?
            .map(CommentId),
        content: r.try_get("content")?,
        is_edited: r.try_get("is_edited")?,
        like_count: r.try_get("like_count")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn comment_from_pg(r: &PgRow) -> anyhow::Result<Comment> {
    let row = row_from_pg(r)?;
    let author = Author {
        id: row.author_id,
        username: r.try_get("username")?,
        full_name: r.try_get("full_name")?,
        avatar_url: r.try_get("avatar_url")?,
    };
    Ok(Comment::from_row(row, author))
}

/// All the comments of `post`, oldest first
pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> anyhow::Result<Vec<Comment>> {
    let query = format!(
        "
            SELECT {COMMENT_COLUMNS}
                FROM comments c
            INNER JOIN profiles p
                ON p.id = c.author_id
            WHERE c.post_id = $1
            ORDER BY c.created_at ASC
        "
    );
    let mut rows = sqlx::query(&query).bind(post.0).fetch(conn);
    let mut res = Vec::new();
    while let Some(r) = rows
        .try_next()
        .await
        .with_context(|| format!("querying comments of post {post:?}"))?
    {
        res.push(comment_from_pg(&r).with_context(|| format!("parsing comment of {post:?}"))?);
    }
    Ok(res)
}

pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    id: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let query = format!(
        "
            SELECT {COMMENT_COLUMNS}
                FROM comments c
            INNER JOIN profiles p
                ON p.id = c.author_id
            WHERE c.id = $1
        "
    );
    sqlx::query(&query)
        .bind(id.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("querying comment {id:?}"))?
        .map(|r| comment_from_pg(&r).with_context(|| format!("parsing comment {id:?}")))
        .transpose()
}

pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    author: UserId,
    post: PostId,
    content: &str,
    parent: Option<CommentId>,
    now: Time,
) -> anyhow::Result<Comment> {
    let id = CommentId(agora_api::Uuid::new_v4());
    sqlx::query(
        "
            INSERT INTO comments
                (id, post_id, author_id, parent_id, content, is_edited, like_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, false, 0, $6, $6)
        ",
    )
    .bind(id.0)
    .bind(post.0)
    .bind(author.0)
    .bind(parent.map(|p| p.0))
    .bind(content)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("inserting comment {id:?} on {post:?}"))?;
    fetch_comment(&mut *conn, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("comment {id:?} vanished right after insertion"))
}

pub async fn edit_comment(
    conn: &mut sqlx::PgConnection,
    id: CommentId,
    content: &str,
    now: Time,
) -> anyhow::Result<Option<Comment>> {
    let res = sqlx::query(
        "UPDATE comments SET content = $2, is_edited = true, updated_at = $3 WHERE id = $1",
    )
    .bind(id.0)
    .bind(content)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("updating comment {id:?}"))?;
    if res.rows_affected() == 0 {
        return Ok(None);
    }
    fetch_comment(&mut *conn, id).await
}

/// Returns the row image of the deleted comment, if it existed
pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    id: CommentId,
) -> anyhow::Result<Option<CommentRow>> {
    sqlx::query(
        "
            DELETE FROM comments
            WHERE id = $1
            RETURNING id, post_id, author_id, parent_id, content, is_edited, like_count,
                created_at, updated_at
        ",
    )
    .bind(id.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("deleting comment {id:?}"))?
    .map(|r| row_from_pg(&r).with_context(|| format!("parsing deleted comment {id:?}")))
    .transpose()
}

pub async fn refresh_comment_count(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> anyhow::Result<()> {
    sqlx::query(
        "
            UPDATE posts
                SET comment_count = (SELECT COUNT(*) FROM comments WHERE post_id = $1)
            WHERE id = $1
        ",
    )
    .bind(post.0)
    .execute(conn)
    .await
    .with_context(|| format!("refreshing comment count of {post:?}"))?;
    Ok(())
}
