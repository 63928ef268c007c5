use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, MeResponse, MessageResponse,
            ProfileResponse, PublicUser, RegisterRequest, UpdateProfileRequest,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        services,
    },
    error::AppError,
    extract::ApiJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/profile", put(update_profile))
        .route("/auth/password", put(change_password))
}

#[instrument(skip_all, fields(email = %payload.email, username = %payload.username))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let keys = JwtKeys::from_ref(&state);
    let (token, user) = services::register(state.users.as_ref(), &keys, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            token,
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip_all, fields(email = %payload.email))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let (token, user) = services::login(state.users.as_ref(), &keys, payload).await?;
    Ok(Json(AuthResponse {
        message: "Login successful",
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user: PublicUser::from(&user),
    })
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = services::update_profile(state.users.as_ref(), user, payload).await?;
    Ok(Json(ProfileResponse {
        message: "Profile updated successfully",
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::change_password(state.users.as_ref(), user, payload).await?;
    Ok(Json(MessageResponse {
        message: "Password updated successfully",
    }))
}
