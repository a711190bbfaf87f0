use axum::{
    extract::State,
    response::Html,
    routing::get,
    Router,
};
use serde::Serialize;
use tera::Context;
use tracing::{info, instrument};

use crate::{
    context::RequestContext,
    error::AppResult,
    state::AppState,
    users::{Role, User},
};

const DATETIME: &[time::format_description::FormatItem<'static>] =
    time::macros::format_description!("[day]/[month]/[year] [hour]:[minute]");

pub fn router() -> Router<AppState> {
    Router::new().route("/admin/users", get(list_users))
}

#[derive(Debug, Serialize)]
struct UserRow {
    username: String,
    email: Option<String>,
    role: &'static str,
    registered_at: String,
    last_login_at: Option<String>,
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        Self {
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role.label(),
            registered_at: u.registered_at.format(DATETIME).unwrap_or_default(),
            last_login_at: u.last_login_at.and_then(|at| at.format(DATETIME).ok()),
        }
    }
}

#[instrument(skip(state, ctx))]
pub async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Html<String>> {
    let identity = ctx.require_role(&[Role::Superuser, Role::Admin]).await?;
    let users = state.users.list().await?;
    info!(user_id = %identity.user_id, count = users.len(), "user list viewed");

    let rows: Vec<UserRow> = users.iter().map(UserRow::from).collect();
    let mut page = Context::new();
    page.insert("users", &rows);
    ctx.render("admin_users.html", page).await
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::TestClient;

    #[tokio::test]
    async fn superuser_sees_every_account() {
        let mut boot = TestClient::new();
        boot.register_and_login("boot", "secret1").await;
        let mut ana = boot.fresh_session();
        ana.register("ana", "secret1").await;

        let res = boot.get("/admin/users").await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains("boot"));
        assert!(res.body.contains("ana"));
        assert!(res.body.contains("Superuser"));
        assert!(res.body.contains("Regular User"));
    }

    #[tokio::test]
    async fn regular_user_is_turned_away() {
        let mut boot = TestClient::new();
        boot.register("boot", "secret1").await;
        let mut ana = boot.fresh_session();
        ana.register_and_login("ana", "secret1").await;

        let res = ana.get("/admin/users").await;
        assert_eq!(res.location(), Some("/"));
        assert!(ana
            .get("/")
            .await
            .body
            .contains("You do not have permission to access this page."));
    }

    #[tokio::test]
    async fn anonymous_visitor_is_sent_to_login() {
        let mut c = TestClient::new();
        assert_eq!(c.get("/admin/users").await.location(), Some("/login"));
    }
}
