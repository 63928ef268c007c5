use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    auth::{
        dto::{ChangePasswordRequest, LoginRequest, RegisterRequest, UpdateProfileRequest},
        jwt::JwtKeys,
        password::{hash_password, password_problem, verify_password},
        repo::UserRepo,
        repo_types::{NewUser, ProfileChanges, Role, User},
    },
    db::RepoError,
    error::AppError,
};

const MAX_NAME_LEN: usize = 50;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.\-]{3,30}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Field-level problems with a user's identity fields, in display order.
fn identity_problems(username: &str, email: &str, first_name: &str, last_name: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if username.is_empty() {
        errors.push("Username is required".to_string());
    } else if !is_valid_username(username) {
        errors.push(
            "Username must be 3-30 characters of letters, numbers, dots, dashes or underscores"
                .to_string(),
        );
    }

    if email.is_empty() {
        errors.push("Email is required".to_string());
    } else if !is_valid_email(email) {
        errors.push("Please enter a valid email".to_string());
    }

    for (label, value) in [("First name", first_name), ("Last name", last_name)] {
        if value.is_empty() {
            errors.push(format!("{label} is required"));
        } else if value.chars().count() > MAX_NAME_LEN {
            errors.push(format!("{label} cannot be more than {MAX_NAME_LEN} characters"));
        }
    }

    errors
}

/// Validates and normalizes a registration; the password stays in plain text.
pub fn validate_registration(req: RegisterRequest) -> Result<(NewUser, String), AppError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();
    let first_name = req.first_name.trim().to_string();
    let last_name = req.last_name.trim().to_string();

    let mut errors = identity_problems(&username, &email, &first_name, &last_name);
    if let Some(p) = password_problem(&req.password) {
        errors.push(p);
    }

    let role = match non_empty(req.role) {
        None => Role::default(),
        Some(raw) => match raw.parse::<Role>() {
            Ok(r) => r,
            Err(msg) => {
                errors.push(msg);
                Role::default()
            }
        },
    };

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    Ok((
        NewUser {
            username,
            email,
            password_hash: String::new(),
            first_name,
            last_name,
            role,
        },
        req.password,
    ))
}

pub async fn register(
    users: &dyn UserRepo,
    keys: &JwtKeys,
    req: RegisterRequest,
) -> Result<(String, User), AppError> {
    const FAILED: &str = "Server error during registration";

    let (mut new_user, password) = validate_registration(req)?;

    if users
        .find_conflicting(Some(&new_user.email), Some(&new_user.username), None)
        .await
        .map_err(AppError::internal(FAILED))?
        .is_some()
    {
        warn!(email = %new_user.email, username = %new_user.username, "user already exists");
        return Err(AppError::bad_request(
            "User already exists with this email or username",
        ));
    }

    new_user.password_hash = hash_password(&password).map_err(AppError::internal(FAILED))?;

    let user = match users.create(new_user).await {
        Ok(u) => u,
        Err(RepoError::Conflict(field)) => {
            warn!(%field, "registration lost a uniqueness race");
            return Err(AppError::bad_request(
                "User already exists with this email or username",
            ));
        }
        Err(e) => return Err(AppError::internal(FAILED)(e)),
    };

    let token = keys.sign(user.id).map_err(AppError::internal(FAILED))?;

    let user = users
        .touch_last_login(user.id, OffsetDateTime::now_utc())
        .await
        .map_err(AppError::internal(FAILED))?
        .unwrap_or(user);

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((token, user))
}

pub async fn login(
    users: &dyn UserRepo,
    keys: &JwtKeys,
    req: LoginRequest,
) -> Result<(String, User), AppError> {
    const FAILED: &str = "Server error during login";

    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("Invalid credentials"));
    }

    let Some(user) = users
        .find_by_email(&email)
        .await
        .map_err(AppError::internal(FAILED))?
    else {
        warn!(%email, "login unknown email");
        return Err(AppError::bad_request("Invalid credentials"));
    };

    if !user.is_active {
        warn!(%email, user_id = %user.id, "login to deactivated account");
        return Err(AppError::bad_request("Account is deactivated"));
    }

    if !verify_password(&req.password, &user.password_hash).map_err(AppError::internal(FAILED))? {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(AppError::bad_request("Invalid credentials"));
    }

    let token = keys.sign(user.id).map_err(AppError::internal(FAILED))?;

    let user = users
        .touch_last_login(user.id, OffsetDateTime::now_utc())
        .await
        .map_err(AppError::internal(FAILED))?
        .unwrap_or(user);

    info!(user_id = %user.id, %email, "user logged in");
    Ok((token, user))
}

/// Writes only the submitted profile fields, so a concurrent password
/// change or login stamp on the same user is never overwritten.
pub async fn update_profile(
    users: &dyn UserRepo,
    user: User,
    req: UpdateProfileRequest,
) -> Result<User, AppError> {
    const FAILED: &str = "Server error during profile update";
    const TAKEN: &str = "Username or email already taken";

    let changes = ProfileChanges {
        username: non_empty(req.username),
        email: non_empty(req.email).map(|e| e.to_lowercase()),
        first_name: non_empty(req.first_name),
        last_name: non_empty(req.last_name),
        avatar: non_empty(req.avatar),
    };
    if changes.is_empty() {
        return Ok(user);
    }

    if changes.username.is_some() || changes.email.is_some() {
        let taken = users
            .find_conflicting(
                changes.email.as_deref(),
                changes.username.as_deref(),
                Some(user.id),
            )
            .await
            .map_err(AppError::internal(FAILED))?;
        if taken.is_some() {
            warn!(
                user_id = %user.id,
                username = ?changes.username,
                email = ?changes.email,
                "username or email already taken"
            );
            return Err(AppError::bad_request(TAKEN));
        }
    }

    let mut preview = user.clone();
    changes.apply_to(&mut preview);
    let errors = identity_problems(
        &preview.username,
        &preview.email,
        &preview.first_name,
        &preview.last_name,
    );
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    match users.update_profile(user.id, &changes).await {
        Ok(Some(saved)) => {
            info!(user_id = %saved.id, "profile updated");
            Ok(saved)
        }
        Ok(None) => Err(AppError::NotFound("User not found")),
        Err(RepoError::Conflict(_)) => Err(AppError::bad_request(TAKEN)),
        Err(e) => Err(AppError::internal(FAILED)(e)),
    }
}

pub async fn change_password(
    users: &dyn UserRepo,
    user: User,
    req: ChangePasswordRequest,
) -> Result<(), AppError> {
    const FAILED: &str = "Server error during password change";

    let (Some(current), Some(new)) = (
        req.current_password.filter(|p| !p.is_empty()),
        req.new_password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request(
            "Current password and new password are required",
        ));
    };

    if !verify_password(&current, &user.password_hash).map_err(AppError::internal(FAILED))? {
        warn!(user_id = %user.id, "current password incorrect");
        return Err(AppError::bad_request("Current password is incorrect"));
    }

    if let Some(p) = password_problem(&new) {
        return Err(AppError::Validation(vec![p]));
    }

    let hash = hash_password(&new).map_err(AppError::internal(FAILED))?;
    users
        .set_password(user.id, &hash)
        .await
        .map_err(AppError::internal(FAILED))?
        .ok_or(AppError::NotFound("User not found"))?;

    info!(user_id = %user.id, "password changed");
    Ok(())
}
