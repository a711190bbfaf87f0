use tracing::warn;

use crate::context::{Identity, RequestContext};
use crate::error::{AppError, AppResult};
use crate::users::Role;
use crate::views::FlashKind;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

/// Route guards. Call one at the top of a protected handler; on failure the
/// notice is already queued and the returned error redirects.
impl RequestContext {
    pub async fn require_login(&self) -> AppResult<Identity> {
        match self.identity() {
            Some(identity) => Ok(identity.clone()),
            None => {
                self.flash(FlashKind::Info, "Please log in to access this page.")
                    .await?;
                Err(AppError::Redirect(LOGIN_PATH.into()))
            }
        }
    }

    pub async fn require_role(&self, allowed: &[Role]) -> AppResult<Identity> {
        let identity = self.require_login().await?;
        if !identity.role.is_any_of(allowed) {
            warn!(user_id = %identity.user_id, role = %identity.role.as_str(), "role not permitted");
            self.flash(FlashKind::Danger, "You do not have permission to access this page.")
                .await?;
            return Err(AppError::Redirect(HOME_PATH.into()));
        }
        Ok(identity)
    }
}
