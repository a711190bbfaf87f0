use axum::{response::Html, routing::get, Router};
use tera::Context;
use tracing::instrument;

use crate::{context::RequestContext, error::AppResult, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/home", get(home))
}

#[instrument(skip(ctx))]
pub async fn home(ctx: RequestContext) -> AppResult<Html<String>> {
    ctx.render("home.html", Context::new()).await
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::TestClient;

    #[tokio::test]
    async fn landing_page_is_public() {
        let mut c = TestClient::new();
        for path in ["/", "/home"] {
            let res = c.get(path).await;
            assert_eq!(res.status, StatusCode::OK);
            assert!(res.body.contains("/register"));
        }
    }

    #[tokio::test]
    async fn unknown_paths_render_the_not_found_page() {
        let mut c = TestClient::new();
        let res = c.get("/no/such/page").await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert!(res.body.contains("Page not found"));
    }
}
