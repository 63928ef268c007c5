use serde::{Deserialize, Serialize};

use crate::bugs::repo_types::{Bug, Environment};

/// `GET /bugs` query string. Empty values are treated as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BugQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    pub project_id: Option<String>,
}

/// Body of `POST /bugs`. Enum fields arrive as strings so bad values are
/// reported with the other validation messages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateBugRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub severity: Option<String>,
    #[serde(rename = "type")]
    pub bug_type: Option<String>,
    pub steps_to_reproduce: Option<Vec<String>>,
    pub expected_behavior: Option<String>,
    pub actual_behavior: Option<String>,
    pub reporter: Option<String>,
    pub assignee: Option<String>,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub environment: Option<Environment>,
    pub project_id: Option<String>,
}

/// Body of `PUT /bugs/:id`: same shape, every field optional, absent fields
/// keep their stored value.
pub type UpdateBugRequest = CreateBugRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBugResponse {
    pub message: &'static str,
    pub deleted_bug: Bug,
}
