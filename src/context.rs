//! Request-scoped view of the visitor's session.
//!
//! Handlers take a [`RequestContext`] instead of reaching into the session
//! directly. It carries an immutable snapshot of who is logged in, the
//! resolved theme and language, and the [`Session`] handle for mutations.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::ACCEPT_LANGUAGE, request::Parts},
    response::Html,
};
use serde::{Deserialize, Serialize};
use time::Duration;
use tower_sessions::{Expiry, Session};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::prefs::{Language, Theme};
use crate::users::{Role, User};
use crate::views::{self, Flash, FlashKind};

pub const LOGGED_IN_KEY: &str = "logged_in";
pub const IDENTITY_KEY: &str = "identity";
pub const THEME_KEY: &str = "theme";
pub const LANG_KEY: &str = "lang";
const FLASHES_KEY: &str = "_flashes";

/// Who is logged in, copied from the user row at login time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

pub struct RequestContext {
    session: Session,
    identity: Option<Identity>,
    theme: Theme,
    lang: Language,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::Internal(anyhow::anyhow!(msg)))?;

        let logged_in = session.get::<bool>(LOGGED_IN_KEY).await?.unwrap_or(false);
        let identity = if logged_in {
            session.get::<Identity>(IDENTITY_KEY).await?
        } else {
            None
        };
        let theme = session.get::<Theme>(THEME_KEY).await?.unwrap_or_default();
        let lang = match session.get::<Language>(LANG_KEY).await? {
            Some(lang) => lang,
            None => parts
                .headers
                .get(ACCEPT_LANGUAGE)
                .and_then(|v| v.to_str().ok())
                .and_then(Language::from_accept_language)
                .unwrap_or_default(),
        };

        Ok(Self {
            session,
            identity,
            theme,
            lang,
        })
    }
}

impl RequestContext {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.identity.is_some()
    }

    /// Queue a notice for the next rendered page.
    pub async fn flash(&self, kind: FlashKind, message: impl Into<String>) -> AppResult<()> {
        let mut queued = self
            .session
            .get::<Vec<Flash>>(FLASHES_KEY)
            .await?
            .unwrap_or_default();
        queued.push(Flash {
            kind,
            message: message.into(),
        });
        self.session.insert(FLASHES_KEY, queued).await?;
        Ok(())
    }

    /// Render a page with the shared layout variables and drain queued notices.
    pub async fn render(&self, template: &str, page: tera::Context) -> AppResult<Html<String>> {
        let flashes = self
            .session
            .remove::<Vec<Flash>>(FLASHES_KEY)
            .await?
            .unwrap_or_default();

        let mut ctx = views::base_context();
        ctx.insert("theme", self.theme.as_str());
        ctx.insert("lang", self.lang.as_str());
        ctx.insert("flashes", &flashes);
        ctx.insert("current_user", &self.identity);
        ctx.extend(page);
        Ok(views::render_page(template, &ctx)?)
    }

    /// Start an authenticated session for `user`.
    ///
    /// The session id is cycled so a pre-login id cannot be reused. Without
    /// `remember` the cookie ends with the browser session instead of the
    /// sliding window configured on the session layer.
    pub async fn sign_in(&mut self, user: &User, remember: bool, ttl_days: i64) -> AppResult<()> {
        self.session.cycle_id().await?;

        let identity = Identity::from(user);
        let theme = user
            .theme
            .as_deref()
            .and_then(|t| t.parse::<Theme>().ok())
            .unwrap_or_default();
        let lang = self
            .session
            .get::<Language>(LANG_KEY)
            .await?
            .unwrap_or_default();

        self.session.insert(LOGGED_IN_KEY, true).await?;
        self.session.insert(IDENTITY_KEY, &identity).await?;
        self.session.insert(THEME_KEY, theme).await?;
        self.session.insert(LANG_KEY, lang).await?;
        self.session.set_expiry(Some(if remember {
            Expiry::OnInactivity(Duration::days(ttl_days))
        } else {
            Expiry::OnSessionEnd
        }));

        self.identity = Some(identity);
        self.theme = theme;
        self.lang = lang;
        Ok(())
    }

    /// Drop everything stored for this visitor.
    pub async fn sign_out(&mut self) -> AppResult<()> {
        self.session.flush().await?;
        self.identity = None;
        self.theme = Theme::default();
        Ok(())
    }

    /// Replace the identity snapshot after the user row changed.
    pub async fn refresh_identity(&mut self, user: &User) -> AppResult<()> {
        let identity = Identity::from(user);
        self.session.insert(IDENTITY_KEY, &identity).await?;
        self.identity = Some(identity);
        Ok(())
    }

    pub async fn set_theme(&mut self, theme: Theme) -> AppResult<()> {
        self.session.insert(THEME_KEY, theme).await?;
        self.theme = theme;
        Ok(())
    }

    pub async fn set_language(&mut self, lang: Language) -> AppResult<()> {
        self.session.insert(LANG_KEY, lang).await?;
        self.lang = lang;
        Ok(())
    }
}
