use agora_api::{
    tree, Action, ChangeEvent, Comment, CommentEdit, CommentId, CommentList, NewComment, PostId,
    Uuid,
};
use anyhow::Context;
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use futures::StreamExt;

use crate::{db, extractors::*, Error, PostFeeds};

pub async fn list_comments(
    Path(post): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<CommentList>, Error> {
    let post = PostId(post);
    let comments = db::fetch_comments(&mut *conn, post)
        .await
        .with_context(|| format!("listing comments of {post:?}"))?;
    let total_count = comments.len();
    Ok(Json(CommentList {
        comments: tree::build_tree(comments),
        total_count,
    }))
}

pub async fn fetch_comment(
    Path(comment): Path<Uuid>,
    mut conn: PgConn,
) -> Result<Json<Comment>, Error> {
    let comment = CommentId(comment);
    db::fetch_comment(&mut *conn, comment)
        .await?
        .map(Json)
        .ok_or_else(|| Error::comment_not_found(comment))
}

async fn refresh_comment_count(conn: &mut sqlx::PgConnection, post: PostId) {
    // Failing here only leaves a stale counter behind
    if let Err(err) = db::refresh_comment_count(conn, post).await {
        tracing::error!(?err, ?post, "failed refreshing comment count");
    }
}

pub async fn create_comment(
    Auth(caller): Auth,
    State(feeds): State<PostFeeds>,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(data): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), Error> {
    let post_id = PostId(post);
    let content = String::from(data.trimmed_content());
    let parent_id = data.parent_id;
    let action = Action::NewComment {
        post_id,
        comment: data,
    };
    let mut db = db::PostgresDb {
        conn: &mut *conn,
        caller,
    };
    action
        .check(&mut db)
        .await
        .with_context(|| format!("checking {action:?} by {caller:?}"))??;

    let comment =
        db::create_comment(&mut *conn, caller.user, post_id, &content, parent_id, Utc::now())
            .await?;
    tracing::info!(comment = ?comment.id, post = ?post_id, "created comment");
    refresh_comment_count(&mut *conn, post_id).await;
    feeds
        .relay_change(ChangeEvent::Inserted { new: comment.row() })
        .await;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn edit_comment(
    Auth(caller): Auth,
    State(feeds): State<PostFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(edit): Json<CommentEdit>,
) -> Result<Json<Comment>, Error> {
    let comment_id = CommentId(comment);
    let content = String::from(edit.trimmed_content());
    let action = Action::EditComment { comment_id, edit };
    let mut db = db::PostgresDb {
        conn: &mut *conn,
        caller,
    };
    action
        .check(&mut db)
        .await
        .with_context(|| format!("checking {action:?} by {caller:?}"))??;

    // The comment may have been deleted since the check
    let comment = db::edit_comment(&mut *conn, comment_id, &content, Utc::now())
        .await?
        .ok_or_else(|| Error::comment_not_found(comment_id))?;
    tracing::info!(comment = ?comment_id, "edited comment");
    feeds
        .relay_change(ChangeEvent::Updated { new: comment.row() })
        .await;
    Ok(Json(comment))
}

pub async fn delete_comment(
    Auth(caller): Auth,
    State(feeds): State<PostFeeds>,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    let comment_id = CommentId(comment);
    let action = Action::DeleteComment(comment_id);
    let mut db = db::PostgresDb {
        conn: &mut *conn,
        caller,
    };
    action
        .check(&mut db)
        .await
        .with_context(|| format!("checking {action:?} by {caller:?}"))??;

    let old = db::delete_comment(&mut *conn, comment_id)
        .await?
        .ok_or_else(|| Error::comment_not_found(comment_id))?;
    tracing::info!(comment = ?comment_id, post = ?old.post_id, "deleted comment");
    refresh_comment_count(&mut *conn, old.post_id).await;
    feeds
        .relay_change(ChangeEvent::Deleted {
            id: old.id,
            post_id: old.post_id,
        })
        .await;
    Ok(())
}

pub async fn comment_feed(
    ws: WebSocketUpgrade,
    Path(post): Path<Uuid>,
    State(feeds): State<PostFeeds>,
) -> axum::response::Response {
    let post = PostId(post);
    ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        tracing::debug!(?post, "comment feed websocket connected");
        feeds.add_for_post(post, write, read)
    })
}
