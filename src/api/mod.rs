use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::config::Config;
use crate::database::Database;
use crate::error::{ApplicationError, BindAddressSnafu, WebServerSnafu};
use crate::fingerprint::{self, ClientIdentity};
use crate::model::{Post, PostView};
use crate::views;

mod error;
mod state;

pub use error::ApiError;
pub use state::App;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

pub async fn serve(config: &Config, database: Database) -> std::result::Result<(), ApplicationError> {
    let router = create_router(App::new(database));

    let listener = tokio::net::TcpListener::bind(config.host)
        .await
        .context(BindAddressSnafu {
            address: config.host,
        })?;

    tracing::info!(address = %config.host, "listening");

    axum::serve(listener, router).await.context(WebServerSnafu)
}

pub fn create_router(app: App) -> Router {
    Router::new()
        .route("/views", get(get_view_count).post(record_view))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

#[derive(Debug, Deserialize)]
pub struct ViewsQuery {
    slug: Option<String>,
}

impl ViewsQuery {
    fn slug(self) -> Result<String> {
        self.slug
            .filter(|slug| !slug.is_empty())
            .context(error::MissingSlugSnafu)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCountResponse {
    pub view_count: i64,
    pub unique_views: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordViewResponse {
    pub success: bool,
    pub view_count: i64,
    pub is_new_view: bool,
}

/// `GET /views?slug=` returns the current denormalized counter plus the
/// number of distinct viewers in the ledger.
#[instrument(skip(app))]
async fn get_view_count(
    State(app): State<App>,
    Query(query): Query<ViewsQuery>,
) -> Result<Json<ViewCountResponse>> {
    let slug = query.slug()?;

    let post = Post::find_by_slug(&slug, &app.database)
        .await
        .context(error::DatabaseSnafu)?
        .context(error::PostNotFoundSnafu { slug })?;

    let unique_views = PostView::count_for(&post.id, &app.database)
        .await
        .context(error::DatabaseSnafu)?;

    Ok(Json(ViewCountResponse {
        view_count: post.view_count,
        unique_views,
    }))
}

/// `POST /views?slug=` derives the visitor's identity from transport
/// headers (never a body) and credits the view if this visitor is new.
/// Repeat calls from the same fingerprint are idempotent.
#[instrument(skip(app, headers))]
async fn record_view(
    State(app): State<App>,
    Query(query): Query<ViewsQuery>,
    headers: HeaderMap,
) -> Result<Json<RecordViewResponse>> {
    let slug = query.slug()?;

    let ip = fingerprint::client_ip(&headers);
    ensure!(
        fingerprint::is_valid_ip(&ip),
        error::InvalidClientIpSnafu { ip: ip.as_str() }
    );

    let identity = ClientIdentity::new(ip, fingerprint::user_agent(&headers));

    let post = Post::find_by_slug(&slug, &app.database)
        .await
        .context(error::DatabaseSnafu)?
        .context(error::PostNotFoundSnafu { slug })?;

    let outcome = views::record_view(&app.database, &post, &identity)
        .await
        .context(error::DatabaseSnafu)?;

    Ok(Json(RecordViewResponse {
        success: true,
        view_count: outcome.view_count,
        is_new_view: outcome.is_new_view,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::Value;

    use super::*;

    async fn server() -> (App, TestServer) {
        let database = Database::memory().await.expect("in-memory database");
        let app = App::new(database);
        let server = TestServer::new(create_router(app.clone())).expect("test server");

        (app, server)
    }

    async fn seed_post(app: &App, slug: &str) -> Post {
        Post::new(slug.to_string(), format!("Title of {slug}"))
            .create(&app.database)
            .await
            .expect("create post")
    }

    fn forwarded_for(ip: &str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_str(ip).unwrap(),
        )
    }

    #[tokio::test]
    async fn missing_slug_is_a_client_error() {
        let (_app, server) = server().await;

        let response = server.get("/views").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server.post("/views").add_query_param("slug", "").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_slug_is_not_found() {
        let (_app, server) = server().await;

        let response = server.get("/views").add_query_param("slug", "nope").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let response = server.post("/views").add_query_param("slug", "nope").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unpublished_post_is_invisible() {
        let (app, server) = server().await;

        let mut draft = Post::new("draft".to_string(), "Draft".to_string());
        draft.published = false;
        draft.create(&app.database).await.unwrap();

        let response = server.get("/views").add_query_param("slug", "draft").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_client_ip_is_rejected() {
        let (app, server) = server().await;
        seed_post(&app, "post-a").await;

        for bad_ip in ["999.999.999.999", ""] {
            let (name, value) = forwarded_for(bad_ip);
            let response = server
                .post("/views")
                .add_query_param("slug", "post-a")
                .add_header(name, value)
                .await;

            assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn loopback_and_ipv6_clients_are_accepted() {
        let (app, server) = server().await;
        seed_post(&app, "post-a").await;

        for ip in ["::1", "2001:0db8:85a3:0000:0000:8a2e:0370:7334"] {
            let (name, value) = forwarded_for(ip);
            let response = server
                .post("/views")
                .add_query_param("slug", "post-a")
                .add_header(name, value)
                .await;

            assert_eq!(response.status_code(), StatusCode::OK);
        }

        // no forwarded header at all falls back to the dev loopback
        let response = server.post("/views").add_query_param("slug", "post-a").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn visitors_are_counted_once_each() {
        let (app, server) = server().await;
        seed_post(&app, "post-a").await;

        let (name, value) = forwarded_for("203.0.113.1");
        let first: RecordViewResponse = server
            .post("/views")
            .add_query_param("slug", "post-a")
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert!(first.success && first.is_new_view);
        assert_eq!(first.view_count, 1);

        let repeat: RecordViewResponse = server
            .post("/views")
            .add_query_param("slug", "post-a")
            .add_header(name, value)
            .await
            .json();
        assert!(!repeat.is_new_view);
        assert_eq!(repeat.view_count, 1);

        let (name, value) = forwarded_for("203.0.113.2");
        let second: RecordViewResponse = server
            .post("/views")
            .add_query_param("slug", "post-a")
            .add_header(name, value)
            .await
            .json();
        assert!(second.is_new_view);
        assert_eq!(second.view_count, 2);

        let counts: ViewCountResponse = server
            .get("/views")
            .add_query_param("slug", "post-a")
            .await
            .json();
        assert_eq!(counts.view_count, 2);
        assert_eq!(counts.unique_views, 2);
    }

    #[tokio::test]
    async fn read_reflects_a_freshly_recorded_view() {
        let (app, server) = server().await;
        seed_post(&app, "post-a").await;

        let (name, value) = forwarded_for("203.0.113.1");
        let recorded: RecordViewResponse = server
            .post("/views")
            .add_query_param("slug", "post-a")
            .add_header(name, value)
            .await
            .json();
        assert!(recorded.is_new_view);

        let counts: ViewCountResponse = server
            .get("/views")
            .add_query_param("slug", "post-a")
            .await
            .json();
        assert_eq!(counts.view_count, recorded.view_count);
        assert_eq!(counts.unique_views, 1);
    }
}
