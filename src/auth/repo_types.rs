use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::text_enum::text_enum;

text_enum! {
    /// What a user does in the tracker.
    pub enum Role ("role") {
        #[default]
        Reporter => "reporter",
        Developer => "developer",
        Tester => "tester",
        Manager => "manager",
        Admin => "admin",
    }
}

/// User record.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,                // always lowercase
    pub password_hash: String,        // Argon2 PHC string, never serialized
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a user; the store assigns nothing else.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl NewUser {
    pub fn into_user(self, now: OffsetDateTime) -> User {
        User {
            id: Uuid::new_v4(),
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            role: self.role,
            avatar: None,
            is_active: true,
            last_login: None,
            created_at: now,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: r.role.parse().map_err(anyhow::Error::msg)?,
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            first_name: r.first_name,
            last_name: r.last_name,
            avatar: r.avatar,
            is_active: r.is_active,
            last_login: r.last_login,
            created_at: r.created_at,
        })
    }
}

/// Profile columns a user may change themselves. `None` leaves the stored
/// value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.avatar.is_none()
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.username {
            user.username = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = &self.first_name {
            user.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            user.last_name = v.clone();
        }
        if let Some(v) = &self.avatar {
            user.avatar = Some(v.clone());
        }
    }
}
