use anyhow::Context;
use axum::{routing::get, Router};
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use structopt::StructOpt;

mod db;
mod error;
mod extractors;
mod feeds;
mod handlers;
#[cfg(test)]
mod tests;

use error::Error;
use extractors::{AppState, PgPool};
use feeds::PostFeeds;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, StructOpt)]
#[structopt(name = "agora-server", about = "Comment service for the agora forum")]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Size of the database connection pool
    #[structopt(long, default_value = "8")]
    max_connections: u32,
}

pub async fn create_sqlx_pool(db_url: &str, max_connections: u32) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub fn app(db: sqlx::PgPool) -> Router {
    Router::new()
        .route(
            "/api/posts/:post_id/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/api/comments/:comment_id",
            get(handlers::fetch_comment)
                .put(handlers::edit_comment)
                .delete(handlers::delete_comment),
        )
        .route("/ws/posts/:post_id/comments", get(handlers::comment_feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState {
            db: PgPool::new(db),
            feeds: PostFeeds::new(),
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let db = create_sqlx_pool(&opt.database_url, opt.max_connections).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("running pending migrations")?;

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app(db).into_make_service())
        .await
        .context("serving axum webserver")
}
