use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewUser, ProfileChanges, User, UserRow},
    db::RepoError,
};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;

    /// `email` must already be lowercased.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;

    /// First user, other than `exclude`, holding either the email or the username.
    async fn find_conflicting(
        &self,
        email: Option<&str>,
        username: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<Option<User>, RepoError>;

    async fn create(&self, new: NewUser) -> Result<User, RepoError>;

    // Each write below touches only its own columns and returns the fresh
    // record, or `None` when the user no longer exists.

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<User>, RepoError>;

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<Option<User>, RepoError>;

    /// `Conflict` when the new email or username belongs to someone else.
    async fn update_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<User>, RepoError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, RepoError>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
                            role, avatar, is_active, last_login, created_at";

pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn convert(row: Option<UserRow>) -> Result<Option<User>, RepoError> {
    row.map(User::try_from).transpose().map_err(RepoError::from)
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn find_conflicting(
        &self,
        email: Option<&str>,
        username: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE (email = $1 OR username = $2)
              AND ($3::uuid IS NULL OR id <> $3)
            LIMIT 1
            "#
        ))
        .bind(email)
        .bind(username)
        .bind(exclude)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.role.as_str())
        .fetch_one(&self.db)
        .await?;
        Ok(User::try_from(row)?)
    }

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET last_login = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET password_hash = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET username   = COALESCE($2, username),
                   email      = COALESCE($3, email),
                   first_name = COALESCE($4, first_name),
                   last_name  = COALESCE($5, last_name),
                   avatar     = COALESCE($6, avatar)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.username)
        .bind(&changes.email)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.avatar)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<User>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET is_active = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }
}
