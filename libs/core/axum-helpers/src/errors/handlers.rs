use axum::http::Uri;
use axum::response::{IntoResponse, Response};

use super::AppError;

/// Fallback handler for unmatched routes
pub async fn not_found(uri: Uri) -> Response {
    AppError::NotFound(format!("No route for {}", uri.path())).into_response()
}
