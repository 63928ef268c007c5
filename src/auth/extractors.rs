use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{jwt::JwtKeys, repo_types::User};
use crate::{error::AppError, state::AppState};

/// Bearer-authenticated caller, loaded from the user store.
pub struct AuthUser(pub User);

/// Like [`AuthUser`] but absent when no `Authorization` header is sent.
/// A header that is present but invalid is still rejected.
pub struct MaybeAuthUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("No token, authorization denied"))?;
        authenticate(header, state).await.map(AuthUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match parts.headers.get(AUTHORIZATION) {
            None => Ok(MaybeAuthUser(None)),
            Some(h) => {
                let header = h
                    .to_str()
                    .map_err(|_| AppError::unauthorized("Invalid Authorization header"))?;
                authenticate(header, state).await.map(|u| MaybeAuthUser(Some(u)))
            }
        }
    }
}

async fn authenticate(header: &str, state: &AppState) -> Result<User, AppError> {
    // Expect "Bearer <token>"
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthorized("Invalid Authorization header"))?;

    let claims = JwtKeys::from_ref(state).verify(token).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        AppError::unauthorized("Token is not valid")
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await
        .map_err(AppError::internal("Server error"))?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for unknown user");
            AppError::unauthorized("Token is not valid")
        })?;

    if !user.is_active {
        warn!(user_id = %user.id, "token for deactivated user");
        return Err(AppError::unauthorized("Account is deactivated"));
    }

    Ok(user)
}
