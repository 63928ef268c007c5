use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::text_enum::text_enum;

text_enum! {
    pub enum BugStatus ("status") {
        #[default]
        Open => "open",
        InProgress => "in-progress",
        Resolved => "resolved",
        Closed => "closed",
    }
}

impl BugStatus {
    /// Next step of the list view's one-click workflow:
    /// open → in-progress → resolved, anything else reopens.
    pub fn advance(self) -> Self {
        match self {
            BugStatus::Open => BugStatus::InProgress,
            BugStatus::InProgress => BugStatus::Resolved,
            BugStatus::Resolved | BugStatus::Closed => BugStatus::Open,
        }
    }
}

text_enum! {
    pub enum Priority ("priority") {
        Low => "low",
        #[default]
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

text_enum! {
    pub enum Severity ("severity") {
        #[default]
        Minor => "minor",
        Major => "major",
        Blocker => "blocker",
    }
}

text_enum! {
    pub enum BugType ("type") {
        #[default]
        Bug => "bug",
        Feature => "feature",
        Enhancement => "enhancement",
        Task => "task",
    }
}

/// Where the bug was observed. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bug {
    pub id: Uuid,
    pub bug_number: String,
    pub title: String,
    pub description: String,
    pub status: BugStatus,
    pub priority: Priority,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub bug_type: BugType,
    pub steps_to_reproduce: Vec<String>,
    pub expected_behavior: Option<String>,
    pub actual_behavior: Option<String>,
    pub reporter: String,
    pub assignee: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub tags: Vec<String>,
    pub environment: Environment,
    pub project_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct BugRow {
    pub id: Uuid,
    pub bug_number: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub severity: String,
    pub bug_type: String,
    pub steps_to_reproduce: Vec<String>,
    pub expected_behavior: Option<String>,
    pub actual_behavior: Option<String>,
    pub reporter: String,
    pub assignee: Option<String>,
    pub due_date: Option<OffsetDateTime>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub tags: Vec<String>,
    pub environment: Json<Environment>,
    pub project_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<BugRow> for Bug {
    type Error = anyhow::Error;

    fn try_from(r: BugRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: r.status.parse().map_err(anyhow::Error::msg)?,
            priority: r.priority.parse().map_err(anyhow::Error::msg)?,
            severity: r.severity.parse().map_err(anyhow::Error::msg)?,
            bug_type: r.bug_type.parse().map_err(anyhow::Error::msg)?,
            id: r.id,
            bug_number: r.bug_number,
            title: r.title,
            description: r.description,
            steps_to_reproduce: r.steps_to_reproduce,
            expected_behavior: r.expected_behavior,
            actual_behavior: r.actual_behavior,
            reporter: r.reporter,
            assignee: r.assignee,
            due_date: r.due_date,
            estimated_hours: r.estimated_hours,
            actual_hours: r.actual_hours,
            tags: r.tags,
            environment: r.environment.0,
            project_id: r.project_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Parsed list filter. `search` is matched case-insensitively as a substring
/// of the title or the description.
#[derive(Debug, Clone, Default)]
pub struct BugFilter {
    pub status: Option<BugStatus>,
    pub priority: Option<Priority>,
    pub search: Option<String>,
    pub project_id: Option<Uuid>,
}

impl BugFilter {
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, bug: &Bug) -> bool {
        if self.status.is_some_and(|s| s != bug.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != bug.priority) {
            return false;
        }
        if self.project_id.is_some() && self.project_id != bug.project_id {
            return false;
        }
        match &self.search {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                bug.title.to_lowercase().contains(&term)
                    || bug.description.to_lowercase().contains(&term)
            }
        }
    }
}
