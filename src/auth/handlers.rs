use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use tera::Context;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use super::{
    dto::{is_valid_email, LoginForm, RegisterForm, RequestResetForm, ResetPasswordForm},
    gate::{HOME_PATH, LOGIN_PATH},
    password::{credentials_match, hash_password, MIN_PASSWORD_LEN},
    tokens::TokenKeys,
};
use crate::{
    context::RequestContext,
    error::AppResult,
    forms::MultipartForm,
    mail::OutgoingMail,
    state::AppState,
    storage::{key_from_public_path, save_image, UploadError},
    users::{NewUser, Role, StoreError, User, DEFAULT_AVATAR},
    views::{FlashKind, PROVINCES},
};

pub const PROFILE_PATH: &str = "/perfil/";
const REQUEST_RESET_PATH: &str = "/request_password_reset";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", get(register_page).post(register))
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route(REQUEST_RESET_PATH, get(request_reset_page).post(request_reset))
        .route("/reset_password/:token", get(reset_password_page).post(reset_password))
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024)) // 16MB avatars
}

fn see_other(to: &str) -> Response {
    Redirect::to(to).into_response()
}

// --- registration ---

async fn render_register(ctx: &RequestContext, form: &RegisterForm) -> AppResult<Html<String>> {
    let mut page = Context::new();
    page.insert("form", form);
    page.insert("provinces", PROVINCES);
    ctx.render("register.html", page).await
}

async fn reject_register(
    ctx: &RequestContext,
    form: &RegisterForm,
    message: &str,
) -> AppResult<Response> {
    ctx.flash(FlashKind::Danger, message).await?;
    Ok(render_register(ctx, form).await?.into_response())
}

#[instrument(skip(ctx))]
pub async fn register_page(ctx: RequestContext) -> AppResult<Html<String>> {
    render_register(&ctx, &RegisterForm::default()).await
}

#[instrument(skip(state, ctx, mp))]
pub async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    mp: Multipart,
) -> AppResult<Response> {
    let raw = MultipartForm::read(mp).await?;
    let form = RegisterForm::from_multipart(&raw);

    let valid = match form.validate_shape() {
        Ok(v) => v,
        Err(reason) => {
            warn!(reason, "registration rejected");
            return reject_register(&ctx, &form, reason).await;
        }
    };

    if state.users.find_by_username(valid.username).await?.is_some() {
        warn!(username = %valid.username, "username already taken");
        return reject_register(
            &ctx,
            &form,
            "That username already exists. Please choose another one.",
        )
        .await;
    }

    if let Some(email) = form.email.as_deref() {
        if state.users.find_by_email(email).await?.is_some() {
            warn!(email, "email already registered");
            return reject_register(
                &ctx,
                &form,
                "That email is already registered. Please use another one.",
            )
            .await;
        }
        if !is_valid_email(email) {
            warn!(email, "invalid email");
            return reject_register(&ctx, &form, "Invalid email format.").await;
        }
    }

    let password_hash = hash_password(valid.password)?;

    let avatar_url = match raw.file("avatar") {
        None => DEFAULT_AVATAR.to_string(),
        Some(file) => match save_image(state.storage.as_ref(), file, "avatars").await {
            Ok(path) => path,
            Err(UploadError::UnsupportedType(name)) => {
                warn!(filename = %name, "avatar type rejected");
                return reject_register(
                    &ctx,
                    &form,
                    "The avatar must be a PNG, JPG, JPEG or GIF image.",
                )
                .await;
            }
            Err(UploadError::Storage(e)) => return Err(e.into()),
        },
    };

    let new_user = NewUser {
        username: valid.username.to_string(),
        email: form.email.clone(),
        password_hash: Some(password_hash),
        role: None,
        first_name: valid.first_name.to_string(),
        last_name: valid.last_name.to_string(),
        second_last_name: form.second_last_name.clone(),
        phone: valid.phone.to_string(),
        avatar_url: avatar_url.clone(),
    };

    match state.users.create(new_user).await {
        Ok(user) => {
            if user.role == Role::Superuser {
                info!(user_id = %user.id, "first account registered as superuser");
            }
            info!(user_id = %user.id, username = %user.username, role = user.role.as_str(), "user registered");
            ctx.flash(FlashKind::Success, "Registration successful! You can now log in.")
                .await?;
            Ok(see_other(LOGIN_PATH))
        }
        Err(e) => {
            discard_upload(&state, &avatar_url).await;
            let message = match e {
                StoreError::Conflict => {
                    warn!(username = %valid.username, "registration lost a uniqueness race");
                    "That username or email is already registered."
                }
                other => {
                    error!(error = %other, username = %valid.username, "create user failed");
                    "Could not complete the registration. Please try again."
                }
            };
            reject_register(&ctx, &form, message).await
        }
    }
}

/// Best-effort removal of an upload that no row refers to.
pub(crate) async fn discard_upload(state: &AppState, public_path: &str) {
    if public_path == DEFAULT_AVATAR {
        return;
    }
    let Some(key) = key_from_public_path(public_path) else {
        return;
    };
    if let Err(e) = state.storage.delete_object(key).await {
        error!(error = %e, key, "could not delete upload");
    }
}

// --- login / logout ---

#[instrument(skip(ctx))]
pub async fn login_page(ctx: RequestContext) -> AppResult<Html<String>> {
    ctx.render("login.html", Context::new()).await
}

#[instrument(skip(state, ctx, form))]
pub async fn login(
    State(state): State<AppState>,
    mut ctx: RequestContext,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let login = form.username_or_email.trim();
    let user = if login.is_empty() {
        None
    } else {
        state.users.find_by_login(login).await?
    };

    match user {
        Some(user) if credentials_match(&form.password, user.password_hash.as_deref()) => {
            if let Err(e) = state
                .users
                .record_login(user.id, OffsetDateTime::now_utc())
                .await
            {
                error!(user_id = %user.id, error = %e, "could not record login time");
            }
            ctx.sign_in(&user, form.remember_me.is_some(), state.config.session_ttl_days)
                .await?;
            info!(user_id = %user.id, username = %user.username, "user logged in");
            ctx.flash(FlashKind::Success, format!("Welcome, {}!", user.username))
                .await?;
            Ok(see_other(PROFILE_PATH))
        }
        // Unknown user and wrong password get the same notice.
        other => {
            match other {
                Some(user) => warn!(user_id = %user.id, "login rejected: bad credentials"),
                None => warn!("login rejected: unknown account"),
            }
            ctx.flash(FlashKind::Danger, "Incorrect username, email or password.")
                .await?;
            Ok(ctx.render("login.html", Context::new()).await?.into_response())
        }
    }
}

#[instrument(skip(ctx))]
pub async fn logout(mut ctx: RequestContext) -> AppResult<Response> {
    let identity = ctx.require_login().await?;
    ctx.sign_out().await?;
    info!(user_id = %identity.user_id, "user logged out");
    ctx.flash(FlashKind::Info, "You have been logged out.").await?;
    Ok(see_other(LOGIN_PATH))
}

// --- password reset ---

#[instrument(skip(ctx))]
pub async fn request_reset_page(ctx: RequestContext) -> AppResult<Response> {
    if ctx.is_logged_in() {
        return Ok(see_other(HOME_PATH));
    }
    Ok(ctx
        .render("request_password_reset.html", Context::new())
        .await?
        .into_response())
}

#[instrument(skip(state, ctx, form))]
pub async fn request_reset(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<RequestResetForm>,
) -> AppResult<Response> {
    if ctx.is_logged_in() {
        return Ok(see_other(HOME_PATH));
    }

    let email = form.email.trim().to_lowercase();
    let user = if email.is_empty() {
        None
    } else {
        state.users.find_by_email(&email).await?
    };

    let Some((user, address)) = user.and_then(|u| u.email.clone().map(|e| (u, e))) else {
        warn!(email = %email, "password reset requested for unknown email");
        ctx.flash(FlashKind::Warning, "No account found with that email address.")
            .await?;
        return Ok(see_other(LOGIN_PATH));
    };

    match send_reset_email(&state, &user, &address).await {
        Ok(()) => {
            info!(user_id = %user.id, "password reset email sent");
            ctx.flash(
                FlashKind::Info,
                "An email with instructions to reset your password has been sent.",
            )
            .await?;
        }
        Err(e) => {
            error!(error = %e, user_id = %user.id, "password reset email failed");
            ctx.flash(
                FlashKind::Danger,
                "Could not send the email. Please try again later.",
            )
            .await?;
        }
    }
    Ok(see_other(LOGIN_PATH))
}

async fn send_reset_email(state: &AppState, user: &User, to: &str) -> anyhow::Result<()> {
    let token = TokenKeys::from_ref(state).sign_reset(user.id)?;
    let link = format!("{}/reset_password/{}", state.config.app_base_url, token);
    state
        .mailer
        .send(OutgoingMail {
            to: to.to_string(),
            subject: "Password reset request".into(),
            body: format!(
                "To reset your password, visit the following link:\n{link}\n\n\
                 If you did not request this change, simply ignore this email.\n"
            ),
        })
        .await
}

async fn user_for_token(state: &AppState, token: &str) -> AppResult<Option<User>> {
    let user_id = match TokenKeys::from_ref(state).verify_reset(token) {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "reset token rejected");
            return Ok(None);
        }
    };
    Ok(state.users.find_by_id(user_id).await?)
}

async fn invalid_reset_link(ctx: &RequestContext) -> AppResult<Response> {
    ctx.flash(FlashKind::Warning, "The reset link is invalid or has expired.")
        .await?;
    Ok(see_other(REQUEST_RESET_PATH))
}

async fn render_reset(ctx: &RequestContext, token: &str) -> AppResult<Response> {
    let mut page = Context::new();
    page.insert("token", token);
    Ok(ctx.render("reset_password.html", page).await?.into_response())
}

#[instrument(skip(state, ctx, token))]
pub async fn reset_password_page(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(token): Path<String>,
) -> AppResult<Response> {
    if ctx.is_logged_in() {
        return Ok(see_other(HOME_PATH));
    }
    if user_for_token(&state, &token).await?.is_none() {
        return invalid_reset_link(&ctx).await;
    }
    render_reset(&ctx, &token).await
}

#[instrument(skip(state, ctx, token, form))]
pub async fn reset_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(token): Path<String>,
    Form(form): Form<ResetPasswordForm>,
) -> AppResult<Response> {
    if ctx.is_logged_in() {
        return Ok(see_other(HOME_PATH));
    }
    let Some(user) = user_for_token(&state, &token).await? else {
        return invalid_reset_link(&ctx).await;
    };

    if form.password.is_empty() || form.password != form.confirm_password {
        ctx.flash(FlashKind::Danger, "Passwords do not match.").await?;
        return render_reset(&ctx, &token).await;
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        ctx.flash(
            FlashKind::Danger,
            "Password must be at least 6 characters long.",
        )
        .await?;
        return render_reset(&ctx, &token).await;
    }

    let hash = hash_password(&form.password)?;
    state.users.update_password(user.id, &hash).await?;
    info!(user_id = %user.id, "password reset completed");
    ctx.flash(
        FlashKind::Success,
        "Your password has been updated. You can now log in.",
    )
    .await?;
    Ok(see_other(LOGIN_PATH))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use time::Duration;

    use std::sync::{atomic::Ordering, Arc};

    use super::*;
    use crate::mail::RecordingMailer;
    use crate::storage::LocalStorage;
    use crate::test_support::{FailingUserStore, TestClient};
    use crate::users::{NewUser, DEFAULT_AVATAR};

    fn client_with_store(users: Arc<FailingUserStore>, upload_root: &std::path::Path) -> TestClient {
        let mut config = AppState::test_config();
        config.upload_folder = upload_root.to_path_buf();
        TestClient::with_state(AppState::from_parts(
            users,
            Arc::new(config),
            Arc::new(LocalStorage::new(upload_root)),
            Arc::new(RecordingMailer::new()),
        ))
    }

    #[tokio::test]
    async fn first_account_is_superuser_and_second_is_regular() {
        let mut c = TestClient::new();
        assert_eq!(c.register("boot", "secret1").await.location(), Some("/login"));
        assert_eq!(c.register("ana", "secret1").await.location(), Some("/login"));

        let boot = c.state.users.find_by_username("boot").await.unwrap().unwrap();
        let ana = c.state.users.find_by_username("ana").await.unwrap().unwrap();
        assert_eq!(boot.role, Role::Superuser);
        assert_eq!(ana.role, Role::Regular);
        assert_ne!(ana.password_hash.as_deref(), Some("secret1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_registrations_make_one_superuser() {
        for _ in 0..10 {
            let base = TestClient::new();
            let tasks: Vec<_> = (0..4)
                .map(|i| {
                    let mut c = base.fresh_session();
                    tokio::spawn(async move { c.register(&format!("user{i}"), "secret1").await })
                })
                .collect();
            for task in tasks {
                assert_eq!(task.await.unwrap().location(), Some("/login"));
            }

            let users = base.state.users.list().await.unwrap();
            assert_eq!(users.len(), 4);
            let superusers = users.iter().filter(|u| u.role == Role::Superuser).count();
            assert_eq!(superusers, 1);
        }
    }

    #[tokio::test]
    async fn failed_insert_leaves_no_avatar_behind() {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(FailingUserStore::default());
        users.fail_create.store(true, Ordering::SeqCst);
        let mut c = client_with_store(users, dir.path());

        let res = c
            .register_with(
                &[("username", "ana"), ("password", "secret1"), ("confirm_password", "secret1")],
                Some(("avatar", "me.png", b"\x89PNGfake")),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains("Could not complete the registration."));

        let avatars = dir.path().join("avatars");
        let leftovers = std::fs::read_dir(&avatars)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn login_survives_a_failed_last_login_update() {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(FailingUserStore::default());
        let mut c = client_with_store(users.clone(), dir.path());
        c.register("ana", "secret1").await;

        users.fail_record_login.store(true, Ordering::SeqCst);
        assert_eq!(c.login("ana", "secret1").await.location(), Some("/perfil/"));
        assert_eq!(c.get("/perfil/").await.status, StatusCode::OK);

        let ana = c.state.users.find_by_username("ana").await.unwrap().unwrap();
        assert!(ana.last_login_at.is_none());
    }

    #[tokio::test]
    async fn register_then_login_lands_on_profile_with_default_role() {
        let mut boot = TestClient::new();
        boot.register("boot", "secret1").await;

        let mut c = boot.fresh_session();
        let res = c.register("ana", "secret1").await;
        assert_eq!(res.status, StatusCode::SEE_OTHER);
        assert_eq!(res.location(), Some("/login"));
        assert!(c.get("/login").await.body.contains("Registration successful!"));

        let res = c.login("ana", "secret1").await;
        assert_eq!(res.location(), Some("/perfil/"));

        let profile = c.get("/perfil/").await;
        assert_eq!(profile.status, StatusCode::OK);
        assert!(profile.body.contains("Welcome, ana!"));
        assert!(profile.body.contains("Regular User"));

        let ana = c.state.users.find_by_username("ana").await.unwrap().unwrap();
        assert!(ana.last_login_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected_and_no_row_is_written() {
        let mut c = TestClient::new();
        c.register("ana", "secret1").await;
        let before = c.state.users.count().await.unwrap();

        let res = c.register("ana", "other-pass").await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains("That username already exists."));
        assert_eq!(c.state.users.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn registration_validation_messages() {
        let mut c = TestClient::new();

        let res = c
            .register_with(&[("username", "ana"), ("password", "secret1"), ("confirm_password", "secret2")], None)
            .await;
        assert!(res.body.contains("Passwords do not match."));

        let res = c
            .register_with(&[("username", "ana"), ("password", "abc"), ("confirm_password", "abc")], None)
            .await;
        assert!(res.body.contains("at least 6 characters"));

        let res = c
            .register_with(
                &[
                    ("username", "ana"),
                    ("password", "secret1"),
                    ("confirm_password", "secret1"),
                    ("email", "not-an-email"),
                ],
                None,
            )
            .await;
        assert!(res.body.contains("Invalid email format."));
        // prior values are echoed back
        assert!(res.body.contains("value=\"ana\""));

        let res = c
            .register_with(
                &[("username", "ana"), ("password", "secret1"), ("confirm_password", "secret1")],
                Some(("avatar", "evil.php", b"<?php")),
            )
            .await;
        assert!(res.body.contains("PNG, JPG, JPEG or GIF"));

        assert_eq!(c.state.users.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_ignoring_case() {
        let mut c = TestClient::new();
        let ok = c
            .register_with(
                &[("username", "ana"), ("password", "secret1"), ("confirm_password", "secret1"), ("email", "Ana@Example.com")],
                None,
            )
            .await;
        assert_eq!(ok.status, StatusCode::SEE_OTHER);
        let ana = c.state.users.find_by_username("ana").await.unwrap().unwrap();
        assert_eq!(ana.email.as_deref(), Some("ana@example.com"));

        let res = c
            .register_with(
                &[("username", "luis"), ("password", "secret1"), ("confirm_password", "secret1"), ("email", "ANA@example.com")],
                None,
            )
            .await;
        assert!(res.body.contains("That email is already registered."));
        assert_eq!(c.state.users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn login_accepts_email_in_any_case() {
        let mut c = TestClient::new();
        c.register_with(
            &[("username", "ana"), ("password", "secret1"), ("confirm_password", "secret1"), ("email", "ana@example.com")],
            None,
        )
        .await;
        assert_eq!(c.login("ANA@example.com", "secret1").await.location(), Some("/perfil/"));
    }

    #[tokio::test]
    async fn account_without_password_hash_can_never_log_in() {
        let mut c = TestClient::new();
        c.state
            .users
            .create(NewUser {
                username: "oauth-user".into(),
                email: Some("oauth@example.com".into()),
                password_hash: None,
                role: Some(Role::Regular),
                first_name: "O".into(),
                last_name: "Auth".into(),
                second_last_name: None,
                phone: "0".into(),
                avatar_url: DEFAULT_AVATAR.into(),
            })
            .await
            .unwrap();

        for (login, password) in [("oauth-user", ""), ("oauth-user", "anything"), ("oauth@example.com", "secret1")] {
            let res = c.login(login, password).await;
            assert_eq!(res.status, StatusCode::OK);
            assert!(res.body.contains("Incorrect username, email or password."));
        }
        assert!(c.get("/perfil/").await.location() == Some("/login"));
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let mut c = TestClient::new();
        c.register("ana", "secret1").await;
        let wrong = c.login("ana", "nope-nope").await;
        let unknown = c.login("ghost", "secret1").await;
        assert_eq!(wrong.status, unknown.status);
        assert!(wrong.body.contains("Incorrect username, email or password."));
        assert!(unknown.body.contains("Incorrect username, email or password."));
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let mut c = TestClient::new();
        c.register_and_login("ana", "secret1").await;
        assert_eq!(c.get("/perfil/").await.status, StatusCode::OK);

        let res = c.get("/logout").await;
        assert_eq!(res.location(), Some("/login"));
        assert!(c.get("/login").await.body.contains("You have been logged out."));
        assert_eq!(c.get("/perfil/").await.location(), Some("/login"));
    }

    #[tokio::test]
    async fn reset_request_for_unknown_email_sends_nothing() {
        let (mut c, mailer) = TestClient::with_recording_mailer();
        c.register("ana", "secret1").await;

        let res = c
            .post_form("/request_password_reset", &[("email", "nobody@example.com")])
            .await;
        assert_eq!(res.location(), Some("/login"));
        assert!(c.get("/login").await.body.contains("No account found with that email address."));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn reset_flow_replaces_the_password() {
        let (mut c, mailer) = TestClient::with_recording_mailer();
        c.register_with(
            &[("username", "ana"), ("password", "secret1"), ("confirm_password", "secret1"), ("email", "ana@example.com")],
            None,
        )
        .await;

        let res = c
            .post_form("/request_password_reset", &[("email", "ANA@example.com")])
            .await;
        assert_eq!(res.location(), Some("/login"));
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.com");

        let link_start = sent[0].body.find("/reset_password/").unwrap();
        let path = sent[0].body[link_start..].lines().next().unwrap().trim().to_string();

        assert_eq!(c.get(&path).await.status, StatusCode::OK);

        let mismatch = c
            .post_form(&path, &[("password", "newpass1"), ("confirm_password", "newpass2")])
            .await;
        assert!(mismatch.body.contains("Passwords do not match."));

        let res = c
            .post_form(&path, &[("password", "newpass1"), ("confirm_password", "newpass1")])
            .await;
        assert_eq!(res.location(), Some("/login"));

        assert_eq!(c.login("ana", "secret1").await.status, StatusCode::OK);
        assert_eq!(c.login("ana", "newpass1").await.location(), Some("/perfil/"));
    }

    #[tokio::test]
    async fn expired_or_forged_reset_links_go_back_to_request_page() {
        let mut c = TestClient::new();
        c.register("ana", "secret1").await;
        let ana = c.state.users.find_by_username("ana").await.unwrap().unwrap();

        let keys = TokenKeys::new(&c.state.config.tokens);
        let expired = keys
            .sign_reset_at(ana.id, OffsetDateTime::now_utc() - Duration::minutes(31))
            .unwrap();

        for token in [expired.as_str(), "not-a-token"] {
            let res = c.get(&format!("/reset_password/{token}")).await;
            assert_eq!(res.location(), Some("/request_password_reset"));
            let res = c
                .post_form(
                    &format!("/reset_password/{token}"),
                    &[("password", "newpass1"), ("confirm_password", "newpass1")],
                )
                .await;
            assert_eq!(res.location(), Some("/request_password_reset"));
        }
        assert!(c
            .get("/request_password_reset")
            .await
            .body
            .contains("The reset link is invalid or has expired."));
        assert_eq!(c.login("ana", "secret1").await.location(), Some("/perfil/"));
    }

    #[tokio::test]
    async fn logged_in_visitors_skip_the_reset_pages() {
        let mut c = TestClient::new();
        c.register_and_login("ana", "secret1").await;
        assert_eq!(c.get("/request_password_reset").await.location(), Some("/"));
        assert_eq!(c.get("/reset_password/whatever").await.location(), Some("/"));
    }
}
