use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::text_enum::text_enum;

text_enum! {
    pub enum ProjectStatus ("project status") {
        #[default]
        Active => "active",
        InProgress => "in-progress",
        Completed => "completed",
        Archived => "archived",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub description: String,
    pub status: ProjectStatus,
    pub owner: String,
    pub members: Vec<String>,
    /// Computed on read from the bugs linked to this project.
    pub bug_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub description: String,
    pub status: String,
    pub owner: String,
    pub members: Vec<String>,
    pub bug_count: i64,
    pub created_at: OffsetDateTime,
}

impl TryFrom<ProjectRow> for Project {
    type Error = anyhow::Error;

    fn try_from(r: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: r.status.parse().map_err(anyhow::Error::msg)?,
            id: r.id,
            name: r.name,
            key: r.key,
            description: r.description,
            owner: r.owner,
            members: r.members,
            bug_count: r.bug_count,
            created_at: r.created_at,
        })
    }
}
