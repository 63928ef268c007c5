use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::RepoError,
    projects::repo_types::{Project, ProjectRow},
};

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    /// All projects, newest first.
    async fn list(&self) -> Result<Vec<Project>, RepoError>;

    async fn find(&self, id: Uuid) -> Result<Option<Project>, RepoError>;

    /// `Conflict` when the key is taken.
    async fn create(&self, project: Project) -> Result<Project, RepoError>;

    async fn update(&self, project: &Project) -> Result<Option<Project>, RepoError>;

    /// Removes the project and unlinks its bugs.
    async fn delete(&self, id: Uuid) -> Result<Option<Project>, RepoError>;
}

const PROJECT_COLUMNS: &str = "id, name, key, description, status, owner, members, created_at";
const BUG_COUNT: &str = "(SELECT COUNT(*) FROM bugs b WHERE b.project_id = projects.id) AS bug_count";

pub struct PgProjectRepo {
    db: PgPool,
}

impl PgProjectRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn convert(row: Option<ProjectRow>) -> Result<Option<Project>, RepoError> {
    row.map(Project::try_from).transpose().map_err(RepoError::from)
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    async fn list(&self) -> Result<Vec<Project>, RepoError> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS}, {BUG_COUNT} FROM projects ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|r| Project::try_from(r).map_err(RepoError::from))
            .collect()
    }

    async fn find(&self, id: Uuid) -> Result<Option<Project>, RepoError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS}, {BUG_COUNT} FROM projects WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn create(&self, project: Project) -> Result<Project, RepoError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            r#"
            INSERT INTO projects ({PROJECT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PROJECT_COLUMNS}, 0::bigint AS bug_count
            "#
        ))
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.key)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(&project.owner)
        .bind(&project.members)
        .bind(project.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(Project::try_from(row)?)
    }

    async fn update(&self, project: &Project) -> Result<Option<Project>, RepoError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            r#"
            UPDATE projects
               SET name = $2, key = $3, description = $4, status = $5, members = $6
             WHERE id = $1
            RETURNING {PROJECT_COLUMNS}, {BUG_COUNT}
            "#
        ))
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.key)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(&project.members)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Project>, RepoError> {
        // bugs.project_id is ON DELETE SET NULL
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "DELETE FROM projects WHERE id = $1 RETURNING {PROJECT_COLUMNS}, {BUG_COUNT}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        convert(row)
    }
}
