use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use snafu::{Location, Snafu};

use crate::database::DatabaseError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    /// the `slug` query parameter is required
    MissingSlug,

    #[snafu(display("`{ip}` is not a valid client address"))]
    InvalidClientIp { ip: String },

    #[snafu(display("no published post with slug `{slug}`"))]
    PostNotFound { slug: String },

    /// the view store is unavailable
    Database {
        source: DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingSlug | ApiError::InvalidClientIp { .. } => StatusCode::BAD_REQUEST,
            ApiError::PostNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Database { source, location } = &self {
            tracing::error!(%source, %location, "view store failure");
        }

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
