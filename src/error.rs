use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use tracing::error;

use crate::users::StoreError;
use crate::views;

/// Terminal outcome of a request that did not produce its normal page.
///
/// Validation problems are not errors: handlers queue a flash message and
/// re-render the form instead.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Authorization failure; the notice has already been queued.
    #[error("redirect to {0}")]
    Redirect(String),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] tower_sessions::session::Error),
    #[error(transparent)]
    Template(#[from] tera::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Redirect(to) => Redirect::to(&to).into_response(),
            AppError::NotFound => error_page(StatusCode::NOT_FOUND, "404.html"),
            other => {
                error!(error = %other, "request failed");
                error_page(StatusCode::INTERNAL_SERVER_ERROR, "500.html")
            }
        }
    }
}

fn error_page(status: StatusCode, template: &str) -> Response {
    match views::render_page(template, &views::base_context()) {
        Ok(html) => (status, html).into_response(),
        Err(e) => {
            error!(error = %e, template, "error page failed to render");
            (status, status.canonical_reason().unwrap_or("error")).into_response()
        }
    }
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}
