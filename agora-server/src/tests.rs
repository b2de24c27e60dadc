use agora_api::{Error as ApiError, Uuid};
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{self, request, Request, StatusCode},
};
use std::panic::AssertUnwindSafe;
use structopt::StructOpt;
use tower::ServiceExt;

use crate::{extractors::*, *};

fn init_logs() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
}

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            init_logs();
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .for_each(move |v: &$typ| {
                    let () = runtime.block_on($fn(v.clone()));
                })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |s: String| async move {
    let Ok(value) = http::HeaderValue::from_str(&s) else {
        return;
    };
    let req = Request::builder()
        .header(http::header::AUTHORIZATION, value)
        .body(())
        .expect("building request");
    let (mut parts, ()): (request::Parts, ()) = req.into_parts();
    match PreAuth::from_request_parts(&mut parts, &()).await {
        Ok(PreAuth(token)) => {
            let mut words = s.split(' ');
            assert!(words
                .next()
                .map_or(false, |w| w.eq_ignore_ascii_case("bearer")));
            assert_eq!(words.next().and_then(|t| Uuid::try_parse(t).ok()), Some(token.0));
        }
        Err(Error::Api(ApiError::Unauthenticated)) => (),
        Err(e) => panic!("unexpected error {e:?} for authorization header {s:?}"),
    }
});

#[tokio::test]
async fn preauth_accepts_bearer_tokens() {
    let token = Uuid::new_v4();
    let req = Request::builder()
        .header(http::header::AUTHORIZATION, format!("bearer {token}"))
        .body(())
        .unwrap();
    let (mut parts, ()) = req.into_parts();
    let PreAuth(got) = PreAuth::from_request_parts(&mut parts, &())
        .await
        .expect("parsing valid bearer token");
    assert_eq!(got.0, token);
}

fn test_app() -> Router {
    init_logs();
    // Nothing in here may actually reach the database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(100))
        .connect_lazy("postgres://agora@localhost/agora_test")
        .expect("configuring lazy pool");
    app(pool)
}

async fn call(req: Request<Body>) -> (StatusCode, hyper::body::Bytes) {
    let resp = test_app().oneshot(req).await.expect("calling router");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("reading response body");
    (status, body)
}

#[tokio::test]
async fn mutations_require_authentication() {
    let post = Uuid::new_v4();
    let comment = Uuid::new_v4();
    let reqs = [
        Request::post(format!("/api/posts/{post}/comments"))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"content":"hello"}"#))
            .unwrap(),
        Request::put(format!("/api/comments/{comment}"))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"content":"hello"}"#))
            .unwrap(),
        Request::delete(format!("/api/comments/{comment}"))
            .body(Body::empty())
            .unwrap(),
    ];
    for req in reqs {
        let uri = req.uri().clone();
        let (status, body) = call(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "for {uri}");
        assert_eq!(
            ApiError::parse(&body).expect("parsing error body"),
            ApiError::Unauthenticated
        );
    }
}

#[tokio::test]
async fn malformed_credentials_are_unauthenticated() {
    let comment = Uuid::new_v4();
    for auth in [
        String::from("Basic dXNlcjpwYXNz"),
        String::from("Bearer not-a-token"),
        format!("Bearer {comment} trailing"),
        String::from("Bearer"),
    ] {
        let req = Request::delete(format!("/api/comments/{comment}"))
            .header(http::header::AUTHORIZATION, auth.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "for {auth:?}");
        assert_eq!(
            ApiError::parse(&body).expect("parsing error body"),
            ApiError::Unauthenticated
        );
    }
}

#[tokio::test]
async fn invalid_ids_are_rejected() {
    let req = Request::get("/api/comments/not-a-uuid")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(req).await.0, StatusCode::BAD_REQUEST);

    let req = Request::get("/api/posts/42/comments")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(req).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let req = Request::get("/api/posts").body(Body::empty()).unwrap();
    assert_eq!(call(req).await.0, StatusCode::NOT_FOUND);

    let req = Request::patch(format!("/api/comments/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(req).await.0, StatusCode::METHOD_NOT_ALLOWED);
}

#[test]
fn options_parse() {
    let opt = Opt::from_iter_safe([
        "agora-server",
        "--database-url",
        "postgres://localhost/agora",
        "--max-connections",
        "2",
    ])
    .expect("parsing options");
    assert_eq!(opt.database_url, "postgres://localhost/agora");
    assert_eq!(opt.max_connections, 2);
}
