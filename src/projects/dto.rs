use serde::{Deserialize, Serialize};

use crate::projects::repo_types::Project;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub key: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub members: Option<Vec<String>>,
}

pub type UpdateProjectRequest = CreateProjectRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProjectResponse {
    pub message: &'static str,
    pub deleted_project: Project,
}
