use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    bugs::repo_types::{Bug, BugFilter, BugRow},
    db::{ilike_pattern, RepoError},
};

#[async_trait]
pub trait BugRepo: Send + Sync {
    /// Matching bugs, newest first.
    async fn list(&self, filter: &BugFilter) -> Result<Vec<Bug>, RepoError>;

    async fn find(&self, id: Uuid) -> Result<Option<Bug>, RepoError>;

    /// Inserts a fully built record. `Conflict` when the bug number is taken.
    async fn create(&self, bug: Bug) -> Result<Bug, RepoError>;

    /// Writes the mutable fields only if the stored `updated_at` still equals
    /// `expected`. `None` when the bug is gone or was changed in between.
    async fn update(
        &self,
        bug: &Bug,
        expected: OffsetDateTime,
    ) -> Result<Option<Bug>, RepoError>;

    /// Removes and returns the record.
    async fn delete(&self, id: Uuid) -> Result<Option<Bug>, RepoError>;
}

const BUG_COLUMNS: &str = "id, bug_number, title, description, status, priority, severity, \
                           bug_type, steps_to_reproduce, expected_behavior, actual_behavior, \
                           reporter, assignee, due_date, estimated_hours, actual_hours, tags, \
                           environment, project_id, created_at, updated_at";

pub struct PgBugRepo {
    db: PgPool,
}

impl PgBugRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn convert(row: Option<BugRow>) -> Result<Option<Bug>, RepoError> {
    row.map(Bug::try_from).transpose().map_err(RepoError::from)
}

#[async_trait]
impl BugRepo for PgBugRepo {
    async fn list(&self, filter: &BugFilter) -> Result<Vec<Bug>, RepoError> {
        let rows = sqlx::query_as::<_, BugRow>(&format!(
            r#"
            SELECT {BUG_COLUMNS}
            FROM bugs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR priority = $2)
              AND ($3::text IS NULL OR title ILIKE $3 OR description ILIKE $3)
              AND ($4::uuid IS NULL OR project_id = $4)
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.priority.map(|p| p.as_str()))
        .bind(filter.search.as_deref().map(ilike_pattern))
        .bind(filter.project_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|r| Bug::try_from(r).map_err(RepoError::from))
            .collect()
    }

    async fn find(&self, id: Uuid) -> Result<Option<Bug>, RepoError> {
        let row = sqlx::query_as::<_, BugRow>(&format!(
            "SELECT {BUG_COLUMNS} FROM bugs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn create(&self, bug: Bug) -> Result<Bug, RepoError> {
        let row = sqlx::query_as::<_, BugRow>(&format!(
            r#"
            INSERT INTO bugs ({BUG_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING {BUG_COLUMNS}
            "#
        ))
        .bind(bug.id)
        .bind(&bug.bug_number)
        .bind(&bug.title)
        .bind(&bug.description)
        .bind(bug.status.as_str())
        .bind(bug.priority.as_str())
        .bind(bug.severity.as_str())
        .bind(bug.bug_type.as_str())
        .bind(&bug.steps_to_reproduce)
        .bind(&bug.expected_behavior)
        .bind(&bug.actual_behavior)
        .bind(&bug.reporter)
        .bind(&bug.assignee)
        .bind(bug.due_date)
        .bind(bug.estimated_hours)
        .bind(bug.actual_hours)
        .bind(&bug.tags)
        .bind(Json(&bug.environment))
        .bind(bug.project_id)
        .bind(bug.created_at)
        .bind(bug.updated_at)
        .fetch_one(&self.db)
        .await?;
        Ok(Bug::try_from(row)?)
    }

    async fn update(
        &self,
        bug: &Bug,
        expected: OffsetDateTime,
    ) -> Result<Option<Bug>, RepoError> {
        let row = sqlx::query_as::<_, BugRow>(&format!(
            r#"
            UPDATE bugs
               SET title = $2, description = $3, status = $4, priority = $5, severity = $6,
                   bug_type = $7, steps_to_reproduce = $8, expected_behavior = $9,
                   actual_behavior = $10, reporter = $11, assignee = $12, due_date = $13,
                   estimated_hours = $14, actual_hours = $15, tags = $16, environment = $17,
                   project_id = $18, updated_at = $19
             WHERE id = $1 AND updated_at = $20
            RETURNING {BUG_COLUMNS}
            "#
        ))
        .bind(bug.id)
        .bind(&bug.title)
        .bind(&bug.description)
        .bind(bug.status.as_str())
        .bind(bug.priority.as_str())
        .bind(bug.severity.as_str())
        .bind(bug.bug_type.as_str())
        .bind(&bug.steps_to_reproduce)
        .bind(&bug.expected_behavior)
        .bind(&bug.actual_behavior)
        .bind(&bug.reporter)
        .bind(&bug.assignee)
        .bind(bug.due_date)
        .bind(bug.estimated_hours)
        .bind(bug.actual_hours)
        .bind(&bug.tags)
        .bind(Json(&bug.environment))
        .bind(bug.project_id)
        .bind(bug.updated_at)
        .bind(expected)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Bug>, RepoError> {
        let row = sqlx::query_as::<_, BugRow>(&format!(
            "DELETE FROM bugs WHERE id = $1 RETURNING {BUG_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }
}
