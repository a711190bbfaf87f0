use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{Language, Theme};
use crate::{context::RequestContext, error::AppResult, state::AppState};

pub fn prefs_routes() -> Router<AppState> {
    Router::new()
        .route("/change_theme/:theme", get(change_theme))
        .route("/change_language/:lang", get(change_language))
}

/// Unknown names are ignored; the answer is always `{"success": true}`.
#[instrument(skip(state, ctx))]
pub async fn change_theme(
    State(state): State<AppState>,
    mut ctx: RequestContext,
    Path(theme): Path<String>,
) -> AppResult<Json<Value>> {
    let Ok(theme) = theme.parse::<Theme>() else {
        debug!(theme = %theme, "unknown theme ignored");
        return Ok(Json(json!({ "success": true })));
    };

    ctx.set_theme(theme).await?;
    if let Some(identity) = ctx.identity() {
        if let Err(e) = state.users.update_theme(identity.user_id, theme.as_str()).await {
            warn!(user_id = %identity.user_id, error = %e, "could not store theme");
        }
    }
    Ok(Json(json!({ "success": true })))
}

#[instrument(skip(ctx))]
pub async fn change_language(
    mut ctx: RequestContext,
    Path(lang): Path<String>,
) -> AppResult<Json<Value>> {
    match lang.parse::<Language>() {
        Ok(lang) => ctx.set_language(lang).await?,
        Err(()) => debug!(lang = %lang, "unsupported language ignored"),
    }
    Ok(Json(json!({ "success": true })))
}
