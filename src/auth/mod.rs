use crate::state::AppState;
use axum::Router;

pub(crate) mod dto;
pub mod gate;
pub mod handlers;
pub mod password;
pub mod tokens;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
