use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use tera::Context;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{display_date, display_datetime, ChangePasswordForm, ProfileForm};
use crate::{
    auth::{
        dto::is_valid_email,
        handlers::{discard_upload, PROFILE_PATH},
        password::{credentials_match, hash_password, MIN_PASSWORD_LEN},
    },
    context::RequestContext,
    error::{AppError, AppResult},
    forms::MultipartForm,
    state::AppState,
    storage::{save_image, UploadError},
    users::{StoreError, User},
    views::{FlashKind, BLOOD_TYPES, PROVINCES},
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route(PROFILE_PATH, get(view_profile))
        .route("/perfil", get(view_profile))
        .route("/perfil/editar", get(edit_profile_page).post(edit_profile))
        .route(
            "/perfil/change_password",
            get(change_password_page).post(change_password),
        )
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024)) // 16MB avatars
}

async fn current_user(state: &AppState, user_id: Uuid) -> AppResult<User> {
    state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(AppError::NotFound)
}

#[instrument(skip(state, ctx))]
pub async fn view_profile(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Html<String>> {
    let identity = ctx.require_login().await?;
    let user = current_user(&state, identity.user_id).await?;

    let mut page = Context::new();
    page.insert("user", &user);
    page.insert("role_label", user.role.label());
    page.insert("registered_at", &display_datetime(user.registered_at));
    page.insert("birthday", &user.birthday.map(display_date));
    ctx.render("profile.html", page).await
}

async fn render_edit(
    ctx: &RequestContext,
    user: &User,
    form: &ProfileForm,
) -> AppResult<Response> {
    let mut page = Context::new();
    page.insert("form", form);
    page.insert("avatar_url", &user.avatar_url);
    page.insert("provinces", PROVINCES);
    page.insert("blood_types", BLOOD_TYPES);
    Ok(ctx.render("edit_profile.html", page).await?.into_response())
}

async fn reject_edit(
    ctx: &RequestContext,
    user: &User,
    form: &ProfileForm,
    message: &str,
) -> AppResult<Response> {
    ctx.flash(FlashKind::Danger, message).await?;
    render_edit(ctx, user, form).await
}

#[instrument(skip(state, ctx))]
pub async fn edit_profile_page(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Response> {
    let identity = ctx.require_login().await?;
    let user = current_user(&state, identity.user_id).await?;
    render_edit(&ctx, &user, &ProfileForm::from_user(&user)).await
}

#[instrument(skip(state, ctx, mp))]
pub async fn edit_profile(
    State(state): State<AppState>,
    mut ctx: RequestContext,
    mp: Multipart,
) -> AppResult<Response> {
    let identity = ctx.require_login().await?;
    let user = current_user(&state, identity.user_id).await?;

    let raw = MultipartForm::read(mp).await?;
    let form = ProfileForm::from_multipart(&raw);

    let Some(username) = form.username.as_deref() else {
        return reject_edit(&ctx, &user, &form, "Username cannot be empty.").await;
    };
    if username != user.username && state.users.find_by_username(username).await?.is_some() {
        warn!(user_id = %user.id, username, "username already taken");
        return reject_edit(
            &ctx,
            &user,
            &form,
            "That username already exists. Please choose another one.",
        )
        .await;
    }

    if let Some(email) = form.email.as_deref() {
        if let Some(owner) = state.users.find_by_email(email).await? {
            if owner.id != user.id {
                warn!(user_id = %user.id, email, "email already registered");
                return reject_edit(
                    &ctx,
                    &user,
                    &form,
                    "That email is already registered. Please use another one.",
                )
                .await;
            }
        }
        if !is_valid_email(email) {
            return reject_edit(&ctx, &user, &form, "Invalid email format.").await;
        }
    }

    let birthday = match form.parsed_birthday() {
        Ok(b) => b,
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "bad birthday");
            return reject_edit(
                &ctx,
                &user,
                &form,
                "Invalid birthday. Use the YYYY-MM-DD format.",
            )
            .await;
        }
    };

    let new_avatar = match raw.file("avatar") {
        None => None,
        Some(file) => match save_image(state.storage.as_ref(), file, "avatars").await {
            Ok(path) => Some(path),
            Err(UploadError::UnsupportedType(name)) => {
                warn!(user_id = %user.id, filename = %name, "avatar type rejected");
                return reject_edit(
                    &ctx,
                    &user,
                    &form,
                    "The avatar must be a PNG, JPG, JPEG or GIF image.",
                )
                .await;
            }
            Err(UploadError::Storage(e)) => return Err(e.into()),
        },
    };

    let avatar_url = new_avatar.clone().unwrap_or_else(|| user.avatar_url.clone());
    let update = form.clone().into_update(&user, birthday, avatar_url);

    let updated = match state.users.update_profile(user.id, update).await {
        Ok(u) => u,
        Err(e) => {
            if let Some(path) = &new_avatar {
                discard_upload(&state, path).await;
            }
            return match e {
                StoreError::Conflict => {
                    warn!(user_id = %user.id, "profile update lost a uniqueness race");
                    reject_edit(
                        &ctx,
                        &user,
                        &form,
                        "That username or email is already registered.",
                    )
                    .await
                }
                other => Err(other.into()),
            };
        }
    };

    if new_avatar.is_some() && user.has_custom_avatar() {
        discard_upload(&state, &user.avatar_url).await;
    }

    ctx.refresh_identity(&updated).await?;
    info!(user_id = %updated.id, "profile updated");
    ctx.flash(FlashKind::Success, "Your profile has been updated.")
        .await?;
    Ok(Redirect::to(PROFILE_PATH).into_response())
}

async fn external_account(ctx: &RequestContext, user: &User) -> AppResult<Option<Response>> {
    if user.password_hash.is_some() {
        return Ok(None);
    }
    ctx.flash(
        FlashKind::Warning,
        "You cannot change the password of an external account.",
    )
    .await?;
    Ok(Some(Redirect::to(PROFILE_PATH).into_response()))
}

async fn reject_password_change(ctx: &RequestContext, message: &str) -> AppResult<Response> {
    ctx.flash(FlashKind::Danger, message).await?;
    Ok(ctx
        .render("change_password.html", Context::new())
        .await?
        .into_response())
}

#[instrument(skip(state, ctx))]
pub async fn change_password_page(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Response> {
    let identity = ctx.require_login().await?;
    let user = current_user(&state, identity.user_id).await?;
    if let Some(redirect) = external_account(&ctx, &user).await? {
        return Ok(redirect);
    }
    Ok(ctx
        .render("change_password.html", Context::new())
        .await?
        .into_response())
}

#[instrument(skip(state, ctx, form))]
pub async fn change_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Response> {
    let identity = ctx.require_login().await?;
    let user = current_user(&state, identity.user_id).await?;
    if let Some(redirect) = external_account(&ctx, &user).await? {
        return Ok(redirect);
    }

    if !credentials_match(&form.current_password, user.password_hash.as_deref()) {
        warn!(user_id = %user.id, "password change rejected: wrong current password");
        return reject_password_change(&ctx, "Current password is incorrect.").await;
    }
    if form.new_password != form.confirm_password {
        return reject_password_change(&ctx, "New passwords do not match.").await;
    }
    if form.new_password.chars().count() < MIN_PASSWORD_LEN {
        return reject_password_change(&ctx, "Password must be at least 6 characters long.")
            .await;
    }

    let hash = hash_password(&form.new_password)?;
    if let Err(e) = state.users.update_password(user.id, &hash).await {
        error!(user_id = %user.id, error = %e, "password update failed");
        return Err(e.into());
    }
    info!(user_id = %user.id, "password changed");
    ctx.flash(FlashKind::Success, "Your password has been changed.")
        .await?;
    Ok(Redirect::to(PROFILE_PATH).into_response())
}
